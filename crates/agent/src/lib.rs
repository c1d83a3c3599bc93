//! Tool-orchestration loop for the product-owner feedback assistant.
//!
//! A turn appends the user's message, then alternates between asking a
//! [`llm::DecisionPolicy`] what to do next and running the capability calls it
//! requests, until the policy answers or the per-turn iteration bound is hit.
//!
//! - `conversation`: transcript, per-category latest results, transcript validation
//! - `tools`: the capability contract and the name-keyed registry
//! - `llm`: decision policy and completion client seams
//! - `runtime`: the bounded loop driving one turn
//! - `capabilities`: feedback analysis, pattern detection, prioritization, story writing
//! - `providers`: Gemini and OpenAI-compatible HTTP backends

pub mod capabilities;
pub mod conversation;
pub mod llm;
pub mod providers;
pub mod runtime;
pub mod tools;

pub use conversation::{ConversationState, InvocationRequest, Message, ResultCategory, Role, TranscriptError};
pub use llm::{DecisionError, DecisionOutcome, DecisionPolicy, LlmClient};
pub use runtime::{AgentRuntime, LoopConfig, LoopState, ITERATION_BOUND_EXCEEDED};
pub use tools::{Capability, CapabilityError, CapabilityRegistry, DispatchErrorKind, RegistryError};
