//! enginectl - drive the hosted chess engines from a terminal.
//!
//! Every engine runs in-process behind an `engine_bridge::Bridge`. Linked
//! engines take over this process's stdin and stdout while they run, so
//! enginectl logs to stderr (or a rolling file with `--log-dir`) and prints
//! results only after the engine has exited.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use engine_bridge::BridgeConfig;
use engine_variants::EngineVariant;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod session;

#[derive(Parser)]
#[command(name = "enginectl", about = "Drive in-process chess engines")]
struct Cli {
    /// Write logs to a daily rolling file in this directory instead of stderr.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the engine variants and whether this build can run them.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Report the mock engines instead of the linked ones.
        #[arg(long)]
        mock: bool,
    },

    /// Start an engine, complete its protocol handshake, and quit.
    Handshake {
        variant: EngineVariant,

        /// Use the built-in mock engine for this variant.
        #[arg(long)]
        mock: bool,

        #[arg(long)]
        json: bool,
    },

    /// Send commands to an engine and print everything it answers.
    ///
    /// `quit` is appended unless the commands already contain it.
    Run {
        variant: EngineVariant,

        /// A command to send; repeat for several.
        #[arg(short = 'c', long = "command")]
        commands: Vec<String>,

        /// Read commands from a file, one per line, after any `-c` commands.
        #[arg(long)]
        script: Option<PathBuf>,

        #[arg(long)]
        mock: bool,

        #[arg(long)]
        json: bool,
    },
}

fn init_logging(log_dir: Option<PathBuf>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::get_default_log_filter()));

    match config::get_log_dir(log_dir) {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(&dir, config::LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_line_number(true),
                )
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir)?;

    let bridge_config = BridgeConfig::from_env();
    let timeout = config::get_session_timeout();
    tracing::debug!("Bridge config: {:?}, session timeout {:?}", bridge_config, timeout);

    match cli.command {
        Commands::List { json, mock } => {
            let registry = session::registry(mock);
            if json {
                print_json(&registry.describe())?;
            } else {
                session::render_list(&registry, &mut std::io::stdout().lock())?;
            }
        }
        Commands::Handshake {
            variant,
            mock,
            json,
        } => {
            let registry = session::registry(mock);
            let transcript = tokio::task::spawn_blocking(move || {
                session::handshake(&registry, variant, bridge_config, timeout)
            })
            .await??;
            if json {
                print_json(&transcript)?;
            } else {
                transcript.render(&mut std::io::stdout().lock())?;
            }
        }
        Commands::Run {
            variant,
            mut commands,
            script,
            mock,
            json,
        } => {
            if let Some(path) = script {
                commands.extend(session::read_script(&path)?);
            }
            if commands.is_empty() {
                bail!("no commands given; use -c <command> or --script <file>");
            }
            let registry = session::registry(mock);
            let transcript =
                session::run_commands(&registry, variant, bridge_config, &commands, timeout)
                    .await?;
            if json {
                print_json(&transcript)?;
            } else {
                transcript.render(&mut std::io::stdout().lock())?;
            }
        }
    }

    Ok(())
}
