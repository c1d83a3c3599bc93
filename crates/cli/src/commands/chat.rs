use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use feedloop_agent::capabilities::{
    build_registry, shared_lines, LineScorePrompt, ScorePrompt, ScoringSource, SharedLines,
};
use feedloop_agent::providers::{build_decision_policy, build_llm_client};
use feedloop_agent::{AgentRuntime, ConversationState, LoopConfig, Role};
use feedloop_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use super::CommandResult;
use crate::ChatArgs;

const PROMPT: &str = "you> ";

pub async fn run(config_path: Option<PathBuf>, args: ChatArgs) -> CommandResult {
    let overrides = ConfigOverrides {
        llm_model: args.model,
        max_iterations: args.max_iterations,
        default_framework: args.framework,
        interactive_scoring: args.interactive_scoring.then_some(true),
        ..ConfigOverrides::default()
    };
    let require_file = config_path.is_some();
    let config = match AppConfig::load(LoadOptions { config_path, require_file, overrides }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), 2)
        }
    };
    init_logging(&config);

    let lines = shared_lines(BufReader::new(tokio::io::stdin()));
    let operator = Arc::new(LineScorePrompt::new(lines.clone(), tokio::io::stdout()));
    let runtime = match build_runtime(&config, operator) {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("chat", "provider_setup", format!("{error:#}"), 3)
        }
    };
    info!(
        event_name = "cli.chat.started",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        max_iterations = config.agent.max_iterations,
        "chat session started"
    );

    let mut stdout = tokio::io::stdout();
    match converse(&runtime, lines, &mut stdout).await {
        Ok(state) => {
            let turns = state.messages.iter().filter(|message| message.role == Role::User).count();
            CommandResult::success_with(
                "chat",
                format!("conversation ended after {turns} turn(s)"),
                Some(serde_json::json!({
                    "turns": turns,
                    "messages": state.messages.len(),
                    "last_error": state.error,
                })),
            )
        }
        Err(error) => CommandResult::failure("chat", "io", format!("{error:#}"), 1),
    }
}

/// `operator` answers scoring questions when interactive scoring is enabled.
pub fn build_runtime(config: &AppConfig, operator: Arc<dyn ScorePrompt>) -> Result<AgentRuntime> {
    let llm = build_llm_client(&config.llm)?;
    let scoring = if config.agent.interactive_scoring {
        ScoringSource::Operator(operator)
    } else {
        ScoringSource::Model
    };
    let registry = build_registry(llm, scoring, config.agent.default_framework)?;
    let policy = build_decision_policy(&config.llm, registry.definitions())?;
    Ok(AgentRuntime::new(policy, Arc::new(registry), LoopConfig::from(&config.agent)))
}

/// Reads one user turn per line until `exit`, `quit` or end of input, printing only the
/// assistant replies each turn added and the turn's error, if any. Lines an operator prompt
/// consumes during a turn never reach the chat.
pub async fn converse<R, W>(
    runtime: &AgentRuntime,
    lines: SharedLines<R>,
    output: &mut W,
) -> Result<ConversationState>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = ConversationState::new();

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let next = lines.lock().await.next_line().await?;
        let Some(line) = next else {
            output.write_all(b"\n").await?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        let start = state.messages.len();
        state = match runtime.run_turn(std::mem::take(&mut state), line).await {
            Ok(state) => state,
            Err(error) => {
                warn!(event_name = "cli.chat.transcript_rejected", error = %error, "conversation reset");
                output
                    .write_all(format!("error: {error}; starting a new conversation\n").as_bytes())
                    .await?;
                continue;
            }
        };

        for reply in state.assistant_replies_since(start) {
            output.write_all(format!("assistant> {}\n", reply.content.trim()).as_bytes()).await?;
        }
        if let Some(error) = &state.error {
            output.write_all(format!("error: {error}\n").as_bytes()).await?;
        }
        output.flush().await?;
    }

    Ok(state)
}

/// Logs go to stderr so they never interleave with the conversation on stdout.
fn init_logging(config: &AppConfig) {
    use feedloop_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
