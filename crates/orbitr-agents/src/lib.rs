//! Orbitr Agents - the event analysis pipeline.
//!
//! An incoming [`StandardizedEvent`](orbitr_protocol::StandardizedEvent) is
//! normalized, routed by the supervisor to expert agents (security,
//! compliance, anomaly, cost, resource, infrastructure), synthesized into an
//! insight and finally scored and persisted by the audit coordinator.
//!
//! LLM use is optional and always guarded: context is scored before the
//! call, and answers are checked against the policies they were given.

pub mod agents;
pub mod context;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod pipeline;
pub mod tracer;

pub use agents::{Agent, AgentOutput, RiskAssessment};
pub use context::{AnalysisContext, ContextAssembler, ContextPolicy};
pub use error::AgentError;
pub use guardrails::{check_context, parse_json_response, validate_response, ContextCheck, GuardrailOutcome, ParsedResponse};
pub use llm::{ChatMessage, CompletionBackend, CompletionRequest, HttpCompletionClient, LlmConfig};
pub use pipeline::{run_id_for, AnalysisReport, Pipeline, PipelineDeps, PipelineRun};
pub use tracer::{TraceSpan, Tracer};
