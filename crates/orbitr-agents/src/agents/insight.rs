use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use orbitr_protocol::{
    AgentFinding, AuditStep, Insight, InsightSource, Severity, StandardizedEvent, AGENT_INSIGHT_SYNTHESIZER,
};
use orbitr_state::{EventHistory, HistorySource};

use super::{Agent, AgentOutput};
use crate::context::{format_remediations, AnalysisContext, ContextAssembler, HistoricalData};
use crate::guardrails::{check_context, parse_json_response, validate_response, ParsedResponse};
use crate::llm::{ChatMessage, CompletionBackend, CompletionRequest};
use crate::pipeline::PipelineRun;
use crate::tracer::Tracer;
use crate::AgentError;

const SIMILAR_EVENTS_LIMIT: usize = 5;
const ACTOR_LOOKBACK_DAYS: u32 = 7;

/// Summary, root cause and actions derived from the findings alone.
pub fn rule_based_insight(event: &StandardizedEvent, findings: &[AgentFinding]) -> Insight {
    let severity = event.severity.as_str();
    let summary = match findings.first() {
        Some(top) => format!("{severity} event: {}. {} finding(s) identified.", top.title, findings.len()),
        None => format!("{severity} event from {}. No critical findings.", event.source_system),
    };
    let actions: &[&str] = match event.severity {
        Severity::Critical => &["Immediate investigation required", "Notify security team"],
        Severity::High => &["Review and assess within 1 hour", "Document incident"],
        Severity::Medium => &["Add to monitoring queue", "Review in next standup"],
        Severity::Low => &["Log for audit purposes"],
    };
    Insight {
        summary,
        root_cause: findings.first().map(|f| {
            if f.description.is_empty() {
                "See findings for details".to_string()
            } else {
                f.description.clone()
            }
        }),
        recommended_actions: actions.iter().map(|a| a.to_string()).collect(),
        source: InsightSource::RuleBased,
        context_score: None,
        guardrails_passed: true,
        warnings: Vec::new(),
    }
}

fn build_prompt(event: &StandardizedEvent, findings: &[AgentFinding], context: &AnalysisContext) -> String {
    let findings_text = findings
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, f)| format!("{}. {}", i + 1, f.title))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze this {} IT event. Respond in JSON only.\n\
         Event: {} from {}\n\
         Findings:\n{}\n\
         Approved remediations:\n{}\n\
         JSON format: {{\"summary\": \"one sentence\", \"root_cause\": \"cause or null\", \"actions\": [\"action1\"]}}",
        event.severity.as_str(),
        event.event_type,
        event.source_system,
        if findings_text.is_empty() { "None".to_string() } else { findings_text },
        format_remediations(&context.approved_remediations),
    )
}

fn system_prompt(context: &AnalysisContext) -> String {
    let mut prompt = "You are an IT security analyst. Be concise.".to_string();
    if !context.applicable_policies.is_empty() {
        let names: Vec<&str> = context.applicable_policies.iter().take(3).map(|p| p.name.as_str()).collect();
        prompt.push_str(&format!(" Relevant policies: {}", names.join(", ")));
    }
    prompt
}

/// Turns findings into an insight. Low and Medium events take the
/// rule-based path; High and Critical go through the LLM when one is
/// configured, with guardrails applied to whatever comes back.
pub struct InsightSynthesizer {
    history: Arc<dyn HistorySource>,
    llm: Option<Arc<dyn CompletionBackend>>,
    assembler: ContextAssembler,
    tracer: Arc<Tracer>,
    strict: bool,
    max_tokens: u32,
}

impl InsightSynthesizer {
    pub fn new(
        history: Arc<dyn HistorySource>,
        llm: Option<Arc<dyn CompletionBackend>>,
        tracer: Arc<Tracer>,
        strict: bool,
        max_tokens: u32,
    ) -> Self {
        Self { history, llm, assembler: ContextAssembler::new(), tracer, strict, max_tokens }
    }

    async fn ask_llm(&self, run: &PipelineRun, context: &AnalysisContext) -> Option<ParsedResponse> {
        let llm = self.llm.as_ref()?;
        let prompt = build_prompt(&run.event, &run.findings, context);
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system_prompt(context)), ChatMessage::user(prompt.clone())],
            max_tokens: self.max_tokens,
            temperature: None,
        };
        let started = Instant::now();
        let result = llm.complete(&request).await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(content) => {
                self.tracer
                    .llm_call(&run.run_id, "insight_synthesis", llm.model(), &prompt, Some(&content), elapsed, None);
                Some(parse_json_response(&content))
            }
            Err(e) => {
                self.tracer.llm_call(
                    &run.run_id,
                    "insight_synthesis",
                    llm.model(),
                    &prompt,
                    None,
                    elapsed,
                    Some(e.to_string()),
                );
                None
            }
        }
    }
}

#[async_trait]
impl Agent for InsightSynthesizer {
    fn id(&self) -> &'static str {
        AGENT_INSIGHT_SYNTHESIZER
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;

        if !event.severity.is_high() {
            let mut insight = rule_based_insight(event, &run.findings);
            insight.context_score = Some(0);
            let audit = AuditStep::new(
                "Insight Synthesis",
                format!("Fast rule-based analysis for {} severity", event.severity.as_str()),
            )
            .agent(AGENT_INSIGHT_SYNTHESIZER)
            .detail("llm_used", false)
            .detail("mode", "rule_based");
            return Ok(AgentOutput {
                insight: Some(insight),
                audit: Some(audit),
                context_score: Some(0),
                ..Default::default()
            });
        }

        let history = EventHistory::new(self.history.as_ref());
        let actor_risk = event
            .actor_hint()
            .map(|actor| history.actor_risk_history(&actor, ACTOR_LOOKBACK_DAYS));
        let data = HistoricalData {
            similar_events: history.similar_events(&event.event_type, 24, SIMILAR_EVENTS_LIMIT),
            actor_risk,
            frequency_anomaly: Some(history.frequency_anomaly(&event.event_type, 1, 10)),
        };
        let context = self.assembler.build(event, &run.findings, data);

        let check = check_context(&context);
        self.tracer
            .guardrail_check(&run.run_id, "context_sufficiency", check.sufficient, json!(check));

        let (parsed, llm_used) = match self.ask_llm(run, &context).await {
            Some(parsed) => (parsed, true),
            None => {
                let fallback = rule_based_insight(event, &run.findings);
                (
                    ParsedResponse {
                        summary: fallback.summary,
                        root_cause: fallback.root_cause,
                        actions: fallback.recommended_actions,
                        parse_error: None,
                    },
                    false,
                )
            }
        };

        let outcome = validate_response(parsed, &context, self.strict);
        self.tracer.guardrail_check(
            &run.run_id,
            "response_validation",
            outcome.valid,
            json!({ "warnings": outcome.warnings }),
        );

        let source = if outcome.refused {
            InsightSource::Refusal
        } else if llm_used {
            InsightSource::Llm
        } else {
            InsightSource::RuleBased
        };
        let summary = if outcome.response.summary.is_empty() {
            "Analysis complete.".to_string()
        } else {
            outcome.response.summary
        };
        let insight = Insight {
            summary,
            root_cause: outcome.response.root_cause,
            recommended_actions: outcome.response.actions,
            source,
            context_score: Some(check.score),
            guardrails_passed: outcome.valid,
            warnings: outcome.warnings,
        };

        let audit = AuditStep::new(
            "Insight Synthesis",
            format!("{} analysis complete", if llm_used { "LLM" } else { "Rule-based" }),
        )
        .agent(AGENT_INSIGHT_SYNTHESIZER)
        .detail("llm_used", llm_used)
        .detail("context_score", check.score)
        .detail("guardrails_passed", insight.guardrails_passed)
        .detail("mode", if llm_used { "llm" } else { "fallback" });

        Ok(AgentOutput {
            insight: Some(insight),
            audit: Some(audit),
            context_score: Some(check.score),
            llm_used,
            guardrails_applied: true,
            ..Default::default()
        })
    }
}
