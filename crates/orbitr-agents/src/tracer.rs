//! In-memory tracing of pipeline runs.
//!
//! Every pipeline run gets a run id (`run_<event id>`).
//! Agents record decision points, LLM calls and guardrail checks against
//! that id; the HTTP API serves them back from
//! `/observability/trace/:trace_id`. Only the most recent runs are kept.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use orbitr_protocol::now_unix;

pub const DEFAULT_MAX_RUNS: usize = 200;
const MAX_STRING_LEN: usize = 500;
const SENSITIVE_KEYS: [&str; 6] = ["api_key", "apikey", "token", "secret", "password", "authorization"];

/// Kind of traced operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Agent,
    Llm,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub span_id: String,
    pub name: String,
    pub run_type: SpanKind,
    pub start_time: f64,
    pub end_time: f64,
    pub duration_ms: f64,
    pub inputs: Value,
    pub outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Replace sensitive keys and truncate long strings, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                let lowered = key.to_lowercase();
                if SENSITIVE_KEYS.contains(&lowered.as_str()) {
                    out.insert(key.clone(), Value::from("[REDACTED]"));
                } else {
                    out.insert(key.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => {
            let head: String = s.chars().take(MAX_STRING_LEN).collect();
            Value::String(format!("{head}...[TRUNCATED]"))
        }
        other => other.clone(),
    }
}

struct TracerInner {
    runs: HashMap<String, Vec<TraceSpan>>,
    order: VecDeque<String>,
}

/// Bounded store of trace spans keyed by run id.
pub struct Tracer {
    inner: Mutex<TracerInner>,
    max_runs: usize,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RUNS)
    }
}

impl Tracer {
    pub fn new(max_runs: usize) -> Self {
        Self {
            inner: Mutex::new(TracerInner { runs: HashMap::new(), order: VecDeque::new() }),
            max_runs: max_runs.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TracerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open (or reopen, discarding old spans) a run.
    pub fn start_run(&self, run_id: &str) {
        let mut inner = self.lock();
        if inner.runs.insert(run_id.to_string(), Vec::new()).is_none() {
            inner.order.push_back(run_id.to_string());
        }
        while inner.order.len() > self.max_runs {
            if let Some(oldest) = inner.order.pop_front() {
                inner.runs.remove(&oldest);
            }
        }
    }

    fn record(&self, run_id: &str, name: String, kind: SpanKind, inputs: Value, outputs: Value, duration_ms: f64, error: Option<String>) {
        let end_time = now_unix();
        let span = TraceSpan {
            span_id: format!("span_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            name,
            run_type: kind,
            start_time: end_time - duration_ms / 1000.0,
            end_time,
            duration_ms,
            inputs: redact(&inputs),
            outputs: redact(&outputs),
            error,
        };
        let mut inner = self.lock();
        match inner.runs.get_mut(run_id) {
            Some(spans) => spans.push(span),
            None => tracing::debug!(run_id, "Span recorded for unknown run, dropped"),
        }
    }

    pub fn agent_decision(&self, run_id: &str, agent_id: &str, decision: &str, reasoning: Value) {
        tracing::debug!(run_id, agent = agent_id, decision, "Agent decision");
        self.record(
            run_id,
            format!("{agent_id}:{decision}"),
            SpanKind::Agent,
            json!({}),
            json!({ "decision": decision, "reasoning": reasoning }),
            0.0,
            None,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn llm_call(
        &self,
        run_id: &str,
        name: &str,
        model: &str,
        prompt: &str,
        response: Option<&str>,
        duration_ms: f64,
        error: Option<String>,
    ) {
        match &error {
            Some(e) => tracing::warn!(run_id, name, model, error = %e, "LLM call failed"),
            None => tracing::info!(run_id, name, model, duration_ms = duration_ms.round(), "LLM call complete"),
        }
        self.record(
            run_id,
            name.to_string(),
            SpanKind::Llm,
            json!({ "prompt": prompt, "model": model }),
            json!({ "response": response, "duration_ms": duration_ms }),
            duration_ms,
            error,
        );
    }

    pub fn guardrail_check(&self, run_id: &str, check_type: &str, passed: bool, details: Value) {
        self.record(
            run_id,
            format!("guardrail:{check_type}"),
            SpanKind::Tool,
            json!({ "check_type": check_type }),
            json!({ "passed": passed, "details": details }),
            0.0,
            None,
        );
    }

    /// Spans recorded for `run_id`, oldest first. `None` if the run is unknown.
    pub fn spans(&self, run_id: &str) -> Option<Vec<TraceSpan>> {
        self.lock().runs.get(run_id).cloned()
    }

    pub fn run_count(&self) -> usize {
        self.lock().order.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.runs.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_sensitive_and_long_values() {
        let long = "x".repeat(600);
        let value = json!({
            "API_KEY": "sk-123",
            "nested": { "password": "hunter2", "ok": 1 },
            "body": long,
        });
        let out = redact(&value);
        assert_eq!(out["API_KEY"], "[REDACTED]");
        assert_eq!(out["nested"]["password"], "[REDACTED]");
        assert_eq!(out["nested"]["ok"], 1);
        let body = out["body"].as_str().unwrap();
        assert!(body.ends_with("...[TRUNCATED]"), "long strings should be truncated");
        assert_eq!(body.len(), 500 + "...[TRUNCATED]".len());
    }

    #[test]
    fn test_runs_are_bounded() {
        let tracer = Tracer::new(2);
        tracer.start_run("run_a");
        tracer.start_run("run_b");
        tracer.agent_decision("run_a", "supervisor", "routed", json!({}));
        tracer.start_run("run_c");
        assert_eq!(tracer.run_count(), 2);
        assert!(tracer.spans("run_a").is_none(), "oldest run should be evicted");
        assert!(tracer.spans("run_c").unwrap().is_empty());
    }

    #[test]
    fn test_spans_recorded_in_order() {
        let tracer = Tracer::default();
        tracer.start_run("run_1");
        tracer.agent_decision("run_1", "anomaly_detector", "baseline_established", json!({"n": 3}));
        tracer.guardrail_check("run_1", "context_sufficiency", true, json!({"score": 75}));
        tracer.llm_call("run_1", "glm_fast", "glm-4.7", "prompt", Some("{}"), 120.0, None);
        let spans = tracer.spans("run_1").unwrap();
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["anomaly_detector:baseline_established", "guardrail:context_sufficiency", "glm_fast"]);
        assert_eq!(spans[2].run_type, SpanKind::Llm);
    }
}
