pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use feedloop_core::Framework;

#[derive(Debug, Parser)]
#[command(
    name = "feedloop",
    about = "Product-owner feedback assistant",
    long_about = "Chat with an assistant that analyzes user feedback, detects recurring themes, \
                  prioritizes features and writes user stories.",
    after_help = "Examples:\n  feedloop chat\n  feedloop chat --framework moscow --interactive-scoring\n  feedloop config\n  feedloop capabilities --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this file instead of feedloop.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive conversation with the assistant")]
    Chat(ChatArgs),
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "List the capabilities the assistant can call and their inputs")]
    Capabilities {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Debug, Default, Args)]
pub struct ChatArgs {
    #[arg(long, help = "Prioritization framework used when a request names none (rice or moscow)")]
    pub framework: Option<Framework>,
    #[arg(long, help = "Ask for missing prioritization scores on the terminal")]
    pub interactive_scoring: bool,
    #[arg(long, help = "Capability batches allowed per turn")]
    pub max_iterations: Option<u32>,
    #[arg(long, help = "Model name passed to the provider")]
    pub model: Option<String>,
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat(args) => commands::chat::run(cli.config, args).await,
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(cli.config) }
        }
        Command::Capabilities { json } => {
            commands::CommandResult { exit_code: 0, output: commands::capabilities::run(json) }
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
