use async_trait::async_trait;

use orbitr_protocol::{AuditStep, AGENT_NORMALIZER};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

/// First stage: fills derived event fields.
pub struct Normalizer;

#[async_trait]
impl Agent for Normalizer {
    fn id(&self) -> &'static str {
        AGENT_NORMALIZER
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let mut event = run.event.clone();
        event.normalize();
        let audit = AuditStep::new(
            "Normalization",
            format!("Event normalized: {} from {}", event.event_type, event.source_system),
        )
        .agent(AGENT_NORMALIZER)
        .detail("domain", event.domain.as_str());
        Ok(AgentOutput { event: Some(event), audit: Some(audit), ..Default::default() })
    }
}
