//! Interactive command lines
//!
//! One command per line, an argument separated by whitespace:
//!
//! | line            | effect                                   |
//! |-----------------|------------------------------------------|
//! | `start`, `stop` | transport                                |
//! | `status`        | print status, position and xruns         |
//! | `c-select N`    | select chain N (1-based)                 |
//! | `c-mute`        | toggle muting of the selected chain      |
//! | `c-bypass`      | toggle processing of the selected chain  |
//! | `c-setpos S`    | seek the selected chain to S seconds     |
//! | `c-rewind S`    | move the selected chain back S seconds   |
//! | `c-forward S`   | move the selected chain ahead S seconds  |
//! | `cop-select N`  | select operator N of the selected chain  |
//! | `copp-select N` | select parameter N of that operator      |
//! | `copp-set V`    | set the selected parameter               |
//! | `setpos S`      | seek everything to S seconds             |
//! | `rewind S`      | move back S seconds                      |
//! | `forward S`     | move ahead S seconds                     |
//! | `quit`, `q`     | leave                                    |

use chainflow_core::engine::EngineCommand;

/// A parsed line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Command(EngineCommand),
    Status,
    Quit,
    Empty,
}

/// Parse one line; the error is a message for the user
pub fn parse_line(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(Line::Empty);
    };
    let argument = words.next();
    if words.next().is_some() {
        return Err(format!("'{}' takes at most one argument", word));
    }

    let seconds = || number(word, argument);
    let index = || number(word, argument).and_then(|v| one_based(word, v));

    let command = match word {
        "quit" | "q" | "exit" => return Ok(Line::Quit),
        "status" | "st" => return Ok(Line::Status),
        "start" | "t" => EngineCommand::Start,
        "stop" | "s" => EngineCommand::Stop,
        "c-select" | "cs" => EngineCommand::SelectChain(index()?),
        "c-mute" | "cm" => EngineCommand::ChainMute,
        "c-bypass" | "cb" => EngineCommand::ChainBypass,
        "c-setpos" => EngineCommand::ChainSetPosition(seconds()?),
        "c-rewind" => EngineCommand::ChainRewind(seconds()?),
        "c-forward" => EngineCommand::ChainForward(seconds()?),
        "cop-select" => EngineCommand::SelectOperator(index()?),
        "copp-select" => EngineCommand::SelectParameter(index()?),
        "copp-set" => EngineCommand::SetParameter(seconds()?),
        "setpos" => EngineCommand::SetPosition(seconds()?),
        "rewind" | "rw" => EngineCommand::Rewind(seconds()?),
        "forward" | "fw" => EngineCommand::Forward(seconds()?),
        _ => return Err(format!("unknown command '{}'", word)),
    };
    Ok(Line::Command(command))
}

fn number(word: &str, argument: Option<&str>) -> Result<f64, String> {
    let text = argument.ok_or_else(|| format!("'{}' needs an argument", word))?;
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", text))
}

fn one_based(word: &str, value: f64) -> Result<usize, String> {
    if value >= 1.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(format!("'{}' needs a whole number starting at 1", word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_and_selection() {
        assert_eq!(parse_line("start"), Ok(Line::Command(EngineCommand::Start)));
        assert_eq!(parse_line("  c-select 2 "), Ok(Line::Command(EngineCommand::SelectChain(2))));
        assert_eq!(parse_line("copp-set -3.5"), Ok(Line::Command(EngineCommand::SetParameter(-3.5))));
        assert_eq!(parse_line("setpos 12.25"), Ok(Line::Command(EngineCommand::SetPosition(12.25))));
        assert_eq!(parse_line("q"), Ok(Line::Quit));
        assert_eq!(parse_line(""), Ok(Line::Empty));
    }

    #[test]
    fn test_bad_lines() {
        assert!(parse_line("c-select").is_err());
        assert!(parse_line("c-select 0").is_err());
        assert!(parse_line("cop-select 1.5").is_err());
        assert!(parse_line("rewind fast").is_err());
        assert!(parse_line("start now please").is_err());
        assert!(parse_line("jump 3").is_err());
    }
}
