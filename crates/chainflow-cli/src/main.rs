//! chainflow - run chain setups from session files
//!
//! ## Commands
//!
//! - `chainflow run [SESSION]`: run a session until its inputs finish
//!   (`--interactive` reads commands from stdin instead)
//! - `chainflow check [SESSION]`: build the setup without running it
//! - `chainflow example-config`: print a session to start from
//!
//! SESSION defaults to `~/.config/chainflow/session.yaml`. Engine defaults
//! for new sessions come from `~/.config/chainflow/settings.yaml` when it
//! exists.

mod interactive;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chainflow_core::config::{default_session_path, default_settings_path, load_config, SessionConfig};
use chainflow_core::engine::{Engine, EngineCommand, EngineController, EngineSettings, EngineStatus};

use interactive::{parse_line, Line};

/// How long `quit` waits for the engine thread to wind down
const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "chainflow")]
#[command(about = "Multi-chain audio processing engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session
    Run {
        /// Session file (YAML)
        session: Option<PathBuf>,

        /// Wait for commands on stdin instead of starting right away
        #[arg(short, long)]
        interactive: bool,

        /// Override the engine buffer size in frames
        #[arg(short, long)]
        buffersize: Option<usize>,

        /// Stop after this many seconds
        #[arg(short = 't', long)]
        length: Option<f64>,

        /// Loop back to the start at the end of the processing length
        #[arg(long = "loop")]
        looping: bool,

        /// Disable the double-buffering I/O thread
        #[arg(long)]
        no_double_buffering: bool,
    },

    /// Build a session's setup without running it
    Check {
        /// Session file (YAML)
        session: Option<PathBuf>,
    },

    /// Print an example session using the engine defaults from settings.yaml
    ExampleConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match Cli::parse().command {
        Commands::Run {
            session,
            interactive,
            buffersize,
            length,
            looping,
            no_double_buffering,
        } => {
            let mut config = load_session(session.as_deref())?;
            let settings = &mut config.settings;
            if let Some(frames) = buffersize {
                settings.buffersize = frames;
            }
            if length.is_some() {
                settings.processing_length = length;
            }
            settings.looping |= looping;
            settings.double_buffering &= !no_double_buffering;
            run(&config, interactive)
        }
        Commands::Check { session } => {
            let config = load_session(session.as_deref())?;
            let setup = config.build_setup().context("invalid session")?;
            setup.validate().context("invalid session")?;
            println!(
                "session '{}': {} chains, {} inputs, {} outputs",
                setup.name(),
                setup.chains().len(),
                setup.inputs().len(),
                setup.outputs().len()
            );
            Ok(())
        }
        Commands::ExampleConfig { output } => {
            let mut example = SessionConfig::example();
            let defaults: EngineSettings = load_config(&default_settings_path());
            example.settings = defaults.with_processing_length(example.settings.processing_length);
            match output {
                Some(path) => example.save(&path),
                None => {
                    print!("{}", example.to_yaml().context("failed to serialize example session")?);
                    Ok(())
                }
            }
        }
    }
}

fn load_session(path: Option<&Path>) -> Result<SessionConfig> {
    let path = path.map_or_else(default_session_path, Path::to_path_buf);
    SessionConfig::load_strict(&path)
}

fn run(config: &SessionConfig, interactive: bool) -> Result<()> {
    let setup = config.build_setup().context("invalid session")?;
    let (mut engine, controller) = Engine::new(setup).context("engine refused the session")?;
    log::info!(
        "chainflow: running '{}' ({} mix mode{})",
        config.name,
        engine.mix_mode(),
        if engine.is_multitrack() { ", multitrack" } else { "" }
    );

    let status = if interactive {
        run_interactive(engine, controller)?
    } else {
        let status = engine.exec();
        report(&controller);
        status?
    };
    println!("finished with status {}", status);
    if status == EngineStatus::Error {
        anyhow::bail!("engine ended in error state");
    }
    Ok(())
}

fn run_interactive(mut engine: Engine, mut controller: EngineController) -> Result<EngineStatus> {
    let handle = thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || engine.exec_interactive())
        .context("failed to spawn the engine thread")?;

    println!("chainflow ready, 'start' to run, 'quit' to leave");
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        match parse_line(&line) {
            Ok(Line::Command(command)) => {
                controller.send(command);
            }
            Ok(Line::Status) => report(&controller),
            Ok(Line::Quit) => break,
            Ok(Line::Empty) => {}
            Err(message) => eprintln!("{}", message),
        }
    }

    controller.send(EngineCommand::Exit);
    if !controller.wait_for_stop(EXIT_TIMEOUT) {
        log::warn!("chainflow: engine still running after exit request");
    }
    let status = handle
        .join()
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))??;
    report(&controller);
    Ok(status)
}

fn report(controller: &EngineController) {
    println!(
        "status {}, position {:.3}s, {} iterations, {} xruns",
        controller.status(),
        controller.position_seconds(),
        controller.iterations(),
        controller.xruns()
    );
}
