//! Lock-free command queue between controller threads and the engine
//!
//! Controllers push [`EngineCommand`]s through an `rtrb` ring; the engine
//! drains the queue once per iteration, strictly in FIFO order, before it
//! touches any sample data. Neither side ever blocks on the queue.
//!
//! Every command also has a flat `(CommandKind, f64)` form for callers that
//! speak the numeric wire format; [`EngineCommand::from_pair`] validates
//! the argument.

use super::{EngineError, EngineResult};

/// Commands sent from a controller thread to the engine thread
///
/// Chain, operator and parameter selections are 1-based. Positions are in
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    Start,
    Stop,
    /// Leave the processing loop
    Exit,

    // ─────────────────────────────────────────────────────────────
    // Chain control (acts on the selected chain)
    // ─────────────────────────────────────────────────────────────
    SelectChain(usize),
    /// Toggle muting of the selected chain
    ChainMute,
    /// Toggle operator processing of the selected chain
    ChainBypass,
    ChainRewind(f64),
    ChainForward(f64),
    ChainSetPosition(f64),

    // ─────────────────────────────────────────────────────────────
    // Operator parameters (selected chain)
    // ─────────────────────────────────────────────────────────────
    SelectOperator(usize),
    SelectParameter(usize),
    SetParameter(f64),

    // ─────────────────────────────────────────────────────────────
    // Global position
    // ─────────────────────────────────────────────────────────────
    Rewind(f64),
    Forward(f64),
    SetPosition(f64),
}

/// Numeric command codes of the pair format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    Start = 1,
    Stop = 2,
    Exit = 3,
    SelectChain = 10,
    ChainMute = 11,
    ChainBypass = 12,
    ChainRewind = 13,
    ChainForward = 14,
    ChainSetPosition = 15,
    SelectOperator = 20,
    SelectParameter = 21,
    SetParameter = 22,
    Rewind = 30,
    Forward = 31,
    SetPosition = 32,
}

impl CommandKind {
    pub const ALL: [CommandKind; 15] = [
        CommandKind::Start,
        CommandKind::Stop,
        CommandKind::Exit,
        CommandKind::SelectChain,
        CommandKind::ChainMute,
        CommandKind::ChainBypass,
        CommandKind::ChainRewind,
        CommandKind::ChainForward,
        CommandKind::ChainSetPosition,
        CommandKind::SelectOperator,
        CommandKind::SelectParameter,
        CommandKind::SetParameter,
        CommandKind::Rewind,
        CommandKind::Forward,
        CommandKind::SetPosition,
    ];

    pub fn from_code(code: u8) -> EngineResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| *k as u8 == code)
            .ok_or(EngineError::UnknownCommand(code))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Exit => "exit",
            CommandKind::SelectChain => "c-select",
            CommandKind::ChainMute => "c-mute",
            CommandKind::ChainBypass => "c-bypass",
            CommandKind::ChainRewind => "c-rewind",
            CommandKind::ChainForward => "c-forward",
            CommandKind::ChainSetPosition => "c-setpos",
            CommandKind::SelectOperator => "cop-select",
            CommandKind::SelectParameter => "copp-select",
            CommandKind::SetParameter => "copp-set",
            CommandKind::Rewind => "rewind",
            CommandKind::Forward => "forward",
            CommandKind::SetPosition => "setpos",
        }
    }
}

impl EngineCommand {
    /// Build a command from its pair form
    ///
    /// Selections must be whole numbers >= 1, positions finite and
    /// non-negative.
    pub fn from_pair(kind: CommandKind, arg: f64) -> EngineResult<Self> {
        let bad = || EngineError::BadCommandArgument {
            command: kind.name().to_string(),
            value: arg,
        };
        let index = || -> EngineResult<usize> {
            if arg.is_finite() && arg >= 1.0 && arg.fract() == 0.0 {
                Ok(arg as usize)
            } else {
                Err(bad())
            }
        };
        let seconds = || -> EngineResult<f64> {
            if arg.is_finite() && arg >= 0.0 {
                Ok(arg)
            } else {
                Err(bad())
            }
        };

        Ok(match kind {
            CommandKind::Start => EngineCommand::Start,
            CommandKind::Stop => EngineCommand::Stop,
            CommandKind::Exit => EngineCommand::Exit,
            CommandKind::SelectChain => EngineCommand::SelectChain(index()?),
            CommandKind::ChainMute => EngineCommand::ChainMute,
            CommandKind::ChainBypass => EngineCommand::ChainBypass,
            CommandKind::ChainRewind => EngineCommand::ChainRewind(seconds()?),
            CommandKind::ChainForward => EngineCommand::ChainForward(seconds()?),
            CommandKind::ChainSetPosition => EngineCommand::ChainSetPosition(seconds()?),
            CommandKind::SelectOperator => EngineCommand::SelectOperator(index()?),
            CommandKind::SelectParameter => EngineCommand::SelectParameter(index()?),
            CommandKind::SetParameter if arg.is_finite() => EngineCommand::SetParameter(arg),
            CommandKind::SetParameter => return Err(bad()),
            CommandKind::Rewind => EngineCommand::Rewind(seconds()?),
            CommandKind::Forward => EngineCommand::Forward(seconds()?),
            CommandKind::SetPosition => EngineCommand::SetPosition(seconds()?),
        })
    }

    /// The command's pair form (argument 0 for commands without one)
    pub fn to_pair(&self) -> (CommandKind, f64) {
        match *self {
            EngineCommand::Start => (CommandKind::Start, 0.0),
            EngineCommand::Stop => (CommandKind::Stop, 0.0),
            EngineCommand::Exit => (CommandKind::Exit, 0.0),
            EngineCommand::SelectChain(n) => (CommandKind::SelectChain, n as f64),
            EngineCommand::ChainMute => (CommandKind::ChainMute, 0.0),
            EngineCommand::ChainBypass => (CommandKind::ChainBypass, 0.0),
            EngineCommand::ChainRewind(s) => (CommandKind::ChainRewind, s),
            EngineCommand::ChainForward(s) => (CommandKind::ChainForward, s),
            EngineCommand::ChainSetPosition(s) => (CommandKind::ChainSetPosition, s),
            EngineCommand::SelectOperator(n) => (CommandKind::SelectOperator, n as f64),
            EngineCommand::SelectParameter(n) => (CommandKind::SelectParameter, n as f64),
            EngineCommand::SetParameter(v) => (CommandKind::SetParameter, v),
            EngineCommand::Rewind(s) => (CommandKind::Rewind, s),
            EngineCommand::Forward(s) => (CommandKind::Forward, s),
            EngineCommand::SetPosition(s) => (CommandKind::SetPosition, s),
        }
    }
}

/// Capacity of the command queue
///
/// Interactive use sends a handful of commands per iteration at most;
/// scripted controllers may burst parameter pokes.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Create a new command channel (producer/consumer pair)
///
/// The producer belongs to the controller side, the consumer to the engine.
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
