use std::collections::HashSet;
use std::sync::Arc;

use feedloop_core::config::{AgentConfig, DEFAULT_MAX_ITERATIONS};
use tracing::{debug, info, warn};

use crate::conversation::{ConversationState, InvocationRequest, Message, TranscriptError};
use crate::llm::{DecisionOutcome, DecisionPolicy};
use crate::tools::CapabilityRegistry;

pub const ITERATION_BOUND_EXCEEDED: &str = "iteration bound exceeded";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    /// Invocation batches allowed per turn. The policy is consulted once more after the last
    /// batch; asking for another one then aborts the turn.
    pub max_iterations: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { max_iterations: DEFAULT_MAX_ITERATIONS }
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self { max_iterations: config.max_iterations }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    AwaitingDecision,
    ExecutingInvocations(Vec<InvocationRequest>),
    Done,
    /// Reached only when the policy asks for invocations after the last allowed batch.
    Aborted,
}

pub struct AgentRuntime {
    policy: Arc<dyn DecisionPolicy>,
    registry: Arc<CapabilityRegistry>,
    config: LoopConfig,
}

impl AgentRuntime {
    pub fn new(
        policy: Arc<dyn DecisionPolicy>,
        registry: Arc<CapabilityRegistry>,
        config: LoopConfig,
    ) -> Self {
        Self { policy, registry, config }
    }

    /// Runs one user turn to completion. Business failures end up in `state.error`; only a
    /// malformed incoming transcript is returned as `Err`.
    pub async fn run_turn(
        &self,
        mut state: ConversationState,
        user_input: &str,
    ) -> Result<ConversationState, TranscriptError> {
        state.validate_transcript()?;
        state.error = None;
        state.messages.push(Message::user(user_input));

        let max_iterations = self.config.max_iterations.max(1);
        let mut iterations = 0_u32;
        let mut loop_state = LoopState::AwaitingDecision;
        info!(
            event_name = "agent.turn.started",
            message_count = state.messages.len(),
            max_iterations,
            "starting turn"
        );

        loop {
            loop_state = match loop_state {
                LoopState::AwaitingDecision => {
                    let exhausted = iterations >= max_iterations;
                    self.await_decision(&mut state, iterations, exhausted).await
                }
                LoopState::ExecutingInvocations(requests) => {
                    self.execute_invocations(&mut state, requests, iterations).await;
                    iterations += 1;
                    LoopState::AwaitingDecision
                }
                LoopState::Done => {
                    info!(
                        event_name = "agent.turn.completed",
                        iterations,
                        message_count = state.messages.len(),
                        failed = state.error.is_some(),
                        "turn completed"
                    );
                    return Ok(state);
                }
                LoopState::Aborted => {
                    warn!(
                        event_name = "agent.turn.aborted",
                        iterations,
                        max_iterations,
                        "iteration bound reached before a final answer"
                    );
                    state.error = Some(ITERATION_BOUND_EXCEEDED.to_string());
                    return Ok(state);
                }
            };
        }
    }

    /// Once `exhausted`, the policy still gets to answer, but further requests abort the turn
    /// without being appended or dispatched.
    async fn await_decision(
        &self,
        state: &mut ConversationState,
        iteration: u32,
        exhausted: bool,
    ) -> LoopState {
        debug!(
            event_name = "agent.decision.requested",
            iteration,
            message_count = state.messages.len(),
            "asking decision policy for next step"
        );

        match self.policy.decide(&state.messages).await {
            Ok(DecisionOutcome::Final(content)) => {
                state.messages.push(Message::assistant(content));
                LoopState::Done
            }
            Ok(DecisionOutcome::RequestInvocations { content, requests }) if requests.is_empty() => {
                state.messages.push(Message::assistant(content));
                LoopState::Done
            }
            Ok(DecisionOutcome::RequestInvocations { requests, .. }) if exhausted => {
                debug!(
                    event_name = "agent.decision.invocations_dropped",
                    iteration,
                    count = requests.len(),
                    "iteration bound reached, dropping requested invocations"
                );
                LoopState::Aborted
            }
            Ok(DecisionOutcome::RequestInvocations { content, requests }) => {
                let requests = normalize_invocation_ids(state.messages.len(), requests);
                debug!(
                    event_name = "agent.decision.invocations_requested",
                    iteration,
                    count = requests.len(),
                    "decision policy requested capability invocations"
                );
                state.messages.push(Message::assistant_requesting(content, requests.clone()));
                LoopState::ExecutingInvocations(requests)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.decision.unavailable",
                    iteration,
                    error = %error,
                    "decision policy failed"
                );
                state.error = Some(error.to_string());
                LoopState::Done
            }
        }
    }

    async fn execute_invocations(
        &self,
        state: &mut ConversationState,
        requests: Vec<InvocationRequest>,
        iteration: u32,
    ) {
        for request in requests {
            let result = self.registry.dispatch(&request.name, request.arguments).await;
            info!(
                event_name = "agent.invocation.dispatched",
                iteration,
                capability = %request.name,
                invocation_id = %request.id,
                is_error = result.is_error(),
                "capability invocation finished"
            );

            if let Some((category, output)) = result.categorized_output() {
                state.latest_results.insert(category, output.clone());
            }
            state.messages.push(Message::tool_result(
                request.id,
                request.name,
                result.content().to_string(),
            ));
        }
    }
}

/// Gives every request in a batch a usable, unique id. Ids the policy left empty or repeated
/// become `call-<assistant message index>-<position>`.
fn normalize_invocation_ids(
    message_index: usize,
    requests: Vec<InvocationRequest>,
) -> Vec<InvocationRequest> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .enumerate()
        .map(|(position, mut request)| {
            if request.id.trim().is_empty() || seen.contains(&request.id) {
                request.id = format!("call-{message_index}-{position}");
            }
            seen.insert(request.id.clone());
            request
        })
        .collect()
}
