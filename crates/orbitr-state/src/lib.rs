//! Orbitr State - persistence and stateful services.
//!
//! - `store`: SQLite audit log, normalized findings and workflow records
//! - `history`: historical queries agents use for pattern detection
//! - `priority`: bounded severity-ordered ingestion queue
//! - `workflow`: compliance workflow state machine
//! - `rules`: declarative compliance rules engine

pub mod error;
pub mod history;
pub mod priority;
pub mod rules;
pub mod store;
pub mod workflow;

pub use error::*;
pub use history::{ActorRiskProfile, EventHistory, FrequencyAnomaly, HistorySource};
pub use priority::{prioritize, EventQueue, QueueStats, QueuedEvent};
pub use rules::{Condition, RuleDefinition, RulesEngine};
pub use store::{
    ActorEvent, AgentActivity, AgentFindingRow, AuditRecord, AuditStore, HourlyCount, ResetCounts, SimilarEvent,
    SummaryStats,
};
pub use workflow::{detect_trigger, StepView, Workflow, WorkflowEngine, WorkflowStatus, WorkflowStep};
