//! HTTP API and realtime endpoint.

use std::collections::BTreeMap;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use orbitr_protocol::{now_unix, unix_to_datetime, ProtocolError, Severity, StandardizedEvent};
use orbitr_state::{AuditRecord, StateError, Workflow, WorkflowStatus};

use crate::chat::{self, ChatRequest};
use crate::dispatcher;
use crate::monitor;
use crate::realtime::stream_loop;
use crate::reports::report_window_hours;
use crate::simulation::{self, scenarios, SimulationError};
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ═══════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════

/// Error answered as `{"detail": "..."}` with a matching status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<SimulationError> for ApiError {
    fn from(e: SimulationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::Conflict(d) => (StatusCode::CONFLICT, d),
            ApiError::TooManyRequests(d) => (StatusCode::TOO_MANY_REQUESTS, d),
            ApiError::State(StateError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, "Workflow not found".to_string())
            }
            ApiError::State(e @ StateError::WorkflowClosed(_)) => (StatusCode::CONFLICT, e.to_string()),
            ApiError::State(e @ (StateError::UnknownWorkflowType(_) | StateError::InvalidRules(_))) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::State(e) => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T = Value> = Result<Json<T>, ApiError>;

/// JSON request body whose rejections answer 400 with a `detail`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(json_rejection)?;
        Ok(JsonBody(value))
    }
}

/// Optional JSON body: an empty body yields `T::default()`, anything else
/// must parse.
pub struct OptionalJsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJsonBody<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|r| ApiError::BadRequest(r.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJsonBody(T::default()));
        }
        let Json(value) = Json::<T>::from_bytes(&bytes).map_err(json_rejection)?;
        Ok(OptionalJsonBody(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    tracing::debug!(status = %rejection.status(), "Rejected request body");
    ApiError::BadRequest(rejection.body_text())
}

fn parse_severity(raw: Option<&str>) -> Result<Option<Severity>, ApiError> {
    raw.filter(|s| !s.is_empty()).map(str::parse).transpose().map_err(ApiError::from)
}

fn iso(ts: f64) -> String {
    unix_to_datetime(ts).to_rfc3339()
}

// ═══════════════════════════════════════════════════════════════
// Server
// ═══════════════════════════════════════════════════════════════

pub struct HttpServer {
    bind_addr: String,
    app: AppState,
}

impl HttpServer {
    pub fn new(bind_addr: String, app: AppState) -> Self {
        Self { bind_addr, app }
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Orbitr API listening");
        serve(listener, self.app).await
    }
}

/// Serve on an already-bound listener, with the background workers running.
pub async fn serve(listener: tokio::net::TcpListener, app: AppState) -> Result<(), anyhow::Error> {
    dispatcher::spawn_workers(&app);
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub fn router(app: AppState) -> Router {
    Router::new()
        // System
        .route("/", get(root))
        .route("/health", get(health))
        .route("/system/reset", delete(system_reset))
        .route("/system/context-providers", get(context_providers))
        .route("/system/connections", get(connections))
        .route("/queue/stats", get(queue_stats))
        .route("/observability/trace/:trace_id", get(trace))
        // Events
        .route("/events", post(ingest_event))
        .route("/events/enqueue", post(enqueue_event))
        // Analytics
        .route("/insights", get(insights))
        .route("/reports/summary", get(summary_report))
        .route("/audit/:correlation_id", get(audit_detail))
        .route("/actors/:actor_id/events", get(actor_events))
        .route("/analytics", get(analytics))
        .route("/analytics/timeseries", get(timeseries))
        .route("/analytics/workflow-health", get(workflow_health))
        .route("/reports", get(list_reports))
        .route("/reports/generate", post(generate_report))
        // Incidents
        .route("/incidents", get(incidents))
        .route("/incidents/:incident_id", get(incident_detail))
        // Workflows
        .route("/workflows", get(workflows))
        .route("/workflows/:workflow_id", get(workflow_detail))
        .route("/workflows/:workflow_id/advance", post(workflow_advance))
        .route("/workflows/:workflow_id/approve", post(workflow_approve))
        .route("/workflows/:workflow_id/reject", post(workflow_reject))
        .route("/workflows/:workflow_id/unblock", post(workflow_unblock))
        .route("/workflows/:workflow_id/reset", post(workflow_reset))
        // Policies and agents
        .route("/policies", get(policies))
        .route("/agents/status", get(agents_status))
        .route("/agents/:agent_id/findings", get(agent_findings))
        // Chat
        .route("/chat", post(chat_handler))
        // Simulation
        .route("/simulation/start", post(simulation_start))
        .route("/simulation/stop", post(simulation_stop))
        .route("/simulation/status", get(simulation_status))
        .route("/simulation/scenarios", get(simulation_scenarios))
        .route("/simulation/scenario/:name", post(simulation_run_scenario))
        .route("/simulation/quick-demo", post(simulation_quick_demo))
        // Realtime
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

// ═══════════════════════════════════════════════════════════════
// System
// ═══════════════════════════════════════════════════════════════

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Orbitr Monitoring System",
        "version": VERSION,
        "status": "operational",
        "features": [
            "Multi-agent analysis",
            "Historical context injection",
            "LLM guardrails",
            "Priority queue",
            "Persistent workflows",
            "Dynamic rules engine",
            "Observability tracing",
            "Realtime stream",
        ],
    }))
}

async fn health(State(app): State<AppState>) -> ApiResult {
    let mut body = app.health();
    body["version"] = Value::from(VERSION);
    body["queue"] = serde_json::to_value(app.queue.stats()).map_err(StateError::from)?;
    body["pending_workflows"] = Value::from(app.workflows.pending()?.len());
    Ok(Json(body))
}

async fn system_reset(State(app): State<AppState>) -> ApiResult {
    let deleted = app.store.reset()?;
    app.queue.clear();
    app.reports.clear();
    app.pipeline.tracer().clear();
    if let Ok(mut limiter) = app.rate_limiter.lock() {
        limiter.reset();
    }
    Ok(Json(json!({
        "status": "reset_complete",
        "message": "All incidents, findings, and workflows cleared.",
        "deleted": {
            "findings": deleted.findings,
            "audit_logs": deleted.audit_logs,
            "workflows": deleted.workflows,
        },
        "timestamp": now_unix(),
    })))
}

async fn context_providers(State(app): State<AppState>) -> Json<Value> {
    let rules = app.pipeline.rules();
    let llm = &app.config.llm;
    Json(json!({
        "llm": {
            "enabled": app.llm.is_some(),
            "model": app.llm.as_ref().map(|c| c.model().to_string()),
            "endpoint": llm.endpoint,
            "fallback_configured": llm.fallback_api_key.as_ref().is_some_and(|k| !k.trim().is_empty()),
        },
        "rules": {
            "count": rules.all_rules().len(),
            "enabled": rules.enabled_rules().count(),
            "source": app.config.rules_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "builtin".to_string()),
            "fingerprint": rules.fingerprint(),
        },
        "tracing": {
            "runs_retained": app.pipeline.tracer().run_count(),
        },
        "guardrails": {
            "enabled": true,
            "strict_mode": app.config.strict_guardrails,
        },
    }))
}

async fn connections(State(app): State<AppState>) -> Json<Value> {
    let clients = app.hub.clients();
    Json(json!({
        "connected_clients": clients.len(),
        "clients": clients,
    }))
}

async fn queue_stats(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "stats": app.queue.stats(),
        "by_priority": app.queue.by_priority(),
    }))
}

async fn trace(State(app): State<AppState>, Path(trace_id): Path<String>) -> ApiResult {
    match app.pipeline.tracer().spans(&trace_id) {
        Some(spans) if !spans.is_empty() => Ok(Json(json!({
            "trace_id": trace_id,
            "span_count": spans.len(),
            "traces": spans,
        }))),
        _ => Err(ApiError::NotFound("Trace not found or expired".to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════

fn admit(app: &AppState, event: &mut StandardizedEvent) -> Result<(), ApiError> {
    event.normalize();
    event.validate()?;
    if !app.allow_source(&event.source_system) {
        tracing::warn!(source = %event.source_system, "Event rejected by rate limiter");
        return Err(ApiError::TooManyRequests(format!(
            "Rate limit exceeded for source '{}'",
            event.source_system
        )));
    }
    Ok(())
}

fn workflow_summary(workflow: &Workflow) -> Value {
    json!({
        "workflow_id": workflow.workflow_id,
        "type": workflow.workflow_type,
        "status": workflow.status,
        "current_step": workflow.current_step,
    })
}

async fn ingest_event(State(app): State<AppState>, JsonBody(mut event): JsonBody<StandardizedEvent>) -> ApiResult {
    admit(&app, &mut event)?;
    let outcome = app.process_event(event).await?;
    let report = &outcome.report;

    let mut body = json!({
        "status": "processed",
        "event_id": report.event.event_id,
        "correlation_id": report.event.correlation_id,
        "priority": outcome.priority,
        "processing_time_ms": report.processing_time_ms,
        "analysis": {
            "risk_score": report.risk_score,
            "highest_severity": report.highest_severity,
            "findings_count": report.findings.len(),
            "findings": report.findings,
            "summary": report.insight.summary,
            "root_cause": report.insight.root_cause,
            "recommended_actions": report.insight.recommended_actions,
            "insight_source": report.insight.source,
        },
        "agents_invoked": report.agents_invoked,
        "audit_trail": report.audit_trail,
        "db_status": report.db_status,
        "observability": {
            "trace_id": report.run_id,
            "context_score": report.context_score,
            "guardrails_applied": report.guardrails_applied,
            "llm_used": report.llm_used,
        },
    });
    if let Some(workflow) = &outcome.workflow {
        body["workflow"] = workflow_summary(workflow);
    }
    Ok(Json(body))
}

async fn enqueue_event(State(app): State<AppState>, JsonBody(mut event): JsonBody<StandardizedEvent>) -> ApiResult {
    admit(&app, &mut event)?;
    let event_id = event.event_id.clone();
    let correlation_id = event.correlation_id.clone();
    match app.queue.enqueue(event) {
        Some(priority) => Ok(Json(json!({
            "status": "queued",
            "event_id": event_id,
            "correlation_id": correlation_id,
            "priority": priority,
            "queue_size": app.queue.len(),
        }))),
        None => Err(ApiError::TooManyRequests("Event queue is full".to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════
// Analytics
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct InsightsQuery {
    limit: Option<usize>,
    severity: Option<String>,
    actor_id: Option<String>,
}

fn insight_json(record: &AuditRecord) -> Value {
    json!({
        "id": record.id,
        "correlation_id": record.correlation_id,
        "event_type": record.event_type,
        "severity": record.severity,
        "domain": record.domain,
        "risk_score": record.risk_score,
        "timestamp": record.timestamp,
        "processing_time_ms": record.processing_time_ms,
        "actor_id": record.actor_id,
        "source": if record.source_system.is_empty() { "System" } else { record.source_system.as_str() },
        "summary": record.insight_text,
        "reasoning": record.insight_text,
        "context_score": record.context_score,
        "guardrails_passed": record.guardrails_passed,
        "llm_used": record.llm_used,
    })
}

async fn insights(State(app): State<AppState>, Query(q): Query<InsightsQuery>) -> ApiResult {
    let limit = q.limit.unwrap_or(10).clamp(1, 100);
    let severity = parse_severity(q.severity.as_deref())?;
    let records = app.store.recent_audit(limit, severity, q.actor_id.as_deref())?;
    let insights: Vec<Value> = records.iter().map(insight_json).collect();
    Ok(Json(json!({ "count": insights.len(), "insights": insights })))
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    hours: Option<u32>,
}

impl HoursQuery {
    fn clamped(&self, default: u32, max: u32) -> u32 {
        self.hours.unwrap_or(default).clamp(1, max)
    }
}

async fn summary_report(State(app): State<AppState>, Query(q): Query<HoursQuery>) -> ApiResult {
    let stats = app.store.summary_stats(q.clamped(24, 168))?;
    let count = |s: &str| stats.by_severity.get(s).copied().unwrap_or(0);
    let mut body = serde_json::to_value(&stats).map_err(StateError::from)?;
    body["risk_distribution"] = json!({
        "high_risk": count("Critical") + count("High"),
        "medium_risk": count("Medium"),
        "low_risk": count("Low"),
    });
    body["performance"] = json!({ "avg_processing_time_ms": stats.avg_processing_time_ms });
    Ok(Json(body))
}

async fn audit_detail(State(app): State<AppState>, Path(correlation_id): Path<String>) -> ApiResult {
    let record = app
        .store
        .audit_by_correlation(&correlation_id)?
        .ok_or_else(|| ApiError::NotFound("Audit log not found".to_string()))?;
    Ok(Json(json!({
        "id": record.id,
        "correlation_id": record.correlation_id,
        "event_type": record.event_type,
        "severity": record.severity,
        "domain": record.domain,
        "source_system": record.source_system,
        "timestamp": record.timestamp,
        "actor_id": record.actor_id,
        "resource_id": record.resource_id,
        "risk_score": record.risk_score,
        "processing_time_ms": record.processing_time_ms,
        "findings": record.findings,
        "insight": record.insight_text,
        "suggestions": record.suggestions,
        "context_score": record.context_score,
        "guardrails_passed": record.guardrails_passed,
        "llm_used": record.llm_used,
    })))
}

async fn actor_events(
    State(app): State<AppState>,
    Path(actor_id): Path<String>,
    Query(q): Query<HoursQuery>,
) -> ApiResult {
    let hours = q.clamped(24, 168);
    let events = app.store.events_by_actor(&actor_id, hours, 100)?;
    Ok(Json(json!({
        "actor_id": actor_id,
        "hours_covered": hours,
        "event_count": events.len(),
        "events": events,
    })))
}

async fn analytics(State(app): State<AppState>, Query(q): Query<HoursQuery>) -> ApiResult {
    let summary = app.store.summary_stats(q.clamped(24, 720))?;
    Ok(Json(json!({
        "summary": summary,
        "active_workflows": app.workflows.pending()?.len(),
        "simulation_active": app.simulation.is_running(),
    })))
}

async fn timeseries(State(app): State<AppState>, Query(q): Query<HoursQuery>) -> ApiResult {
    let hours = q.clamped(6, 24);
    let buckets = app.store.hourly_counts(hours)?;
    let total_events = buckets.iter().map(|b| b.events).sum::<u64>();
    let total_critical = buckets.iter().map(|b| b.critical).sum::<u64>();
    let data: Vec<Value> = buckets
        .iter()
        .map(|b| {
            let hour_end = unix_to_datetime(b.hour_end);
            json!({
                "time": hour_end.format("%-I %p").to_string().to_lowercase(),
                "hour": hour_end.format("%H:00").to_string(),
                "events": b.events,
                "critical": b.critical,
            })
        })
        .collect();
    Ok(Json(json!({
        "hours": hours,
        "data": data,
        "total_events": total_events,
        "total_critical": total_critical,
    })))
}

async fn workflow_health(State(app): State<AppState>) -> ApiResult {
    let workflows = app.workflows.all()?;
    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for workflow in &workflows {
        *by_status.entry(workflow.status.as_str()).or_insert(0) += 1;
    }
    let count = |s: WorkflowStatus| by_status.get(s.as_str()).copied().unwrap_or(0);
    Ok(Json(json!({
        "total": workflows.len(),
        "healthy_count": count(WorkflowStatus::Completed) + count(WorkflowStatus::Approved),
        "warning_count": count(WorkflowStatus::AwaitingApproval) + count(WorkflowStatus::InProgress),
        "critical_count": count(WorkflowStatus::Escalated) + count(WorkflowStatus::Expired),
        "by_status": by_status,
    })))
}

async fn list_reports(State(app): State<AppState>) -> Json<Value> {
    let reports = app.reports.all();
    Json(json!({ "count": reports.len(), "reports": reports }))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    #[serde(rename = "type")]
    report_type: Option<String>,
}

async fn generate_report(State(app): State<AppState>, Query(q): Query<ReportQuery>) -> ApiResult {
    let report_type = q
        .report_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'type' is required".to_string()))?;
    let summary = app.store.summary_stats(report_window_hours(&report_type))?;
    let report = app.reports.generate(&report_type, summary);
    Ok(Json(serde_json::to_value(report).map_err(StateError::from)?))
}

// ═══════════════════════════════════════════════════════════════
// Incidents
// ═══════════════════════════════════════════════════════════════

/// Incident lifecycle label from a 0..=1 risk score.
fn incident_status(risk_score: f64) -> &'static str {
    if risk_score < 0.5 {
        "resolved"
    } else if risk_score < 0.8 {
        "investigating"
    } else {
        "active"
    }
}

fn root_cause(record: &AuditRecord) -> Option<String> {
    record.findings.first().map(|f| {
        if f.description.is_empty() {
            f.title.clone()
        } else {
            f.description.clone()
        }
    })
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    severity: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

async fn incidents(State(app): State<AppState>, Query(q): Query<IncidentsQuery>) -> ApiResult {
    let severity = parse_severity(q.severity.as_deref())?;
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    let records = app.store.incidents(severity, limit)?;
    let workflows = app.workflows.all()?;

    let incidents: Vec<Value> = records
        .iter()
        .map(|record| (record, incident_status(record.risk_score)))
        .filter(|(_, status)| q.status.as_deref().map_or(true, |wanted| wanted.eq_ignore_ascii_case(status)))
        .map(|(record, status)| {
            let affected: Vec<&str> = workflows
                .iter()
                .filter(|w| w.correlation_id == record.correlation_id)
                .map(|w| w.workflow_id.as_str())
                .collect();
            json!({
                "id": record.correlation_id,
                "title": record.event_type,
                "severity": record.severity.as_str().to_lowercase(),
                "timestamp": iso(record.timestamp),
                "status": status,
                "agents": record.findings.iter().take(3).map(|f| f.agent_id.as_str()).collect::<Vec<_>>(),
                "affectedWorkflows": affected,
                "findings": record.findings.len(),
                "rootCause": root_cause(record),
            })
        })
        .collect();
    Ok(Json(json!({ "count": incidents.len(), "incidents": incidents })))
}

async fn incident_detail(State(app): State<AppState>, Path(incident_id): Path<String>) -> ApiResult {
    let record = app
        .store
        .audit_by_correlation(&incident_id)?
        .ok_or_else(|| ApiError::NotFound("Incident not found".to_string()))?;
    let detected = iso(record.timestamp);
    Ok(Json(json!({
        "id": record.correlation_id,
        "title": record.event_type,
        "severity": record.severity,
        "timestamp": detected,
        "status": if record.risk_score < 0.5 { "resolved" } else { "investigating" },
        "risk_score": record.risk_score,
        "findings": record.findings,
        "root_cause": root_cause(&record),
        "recommendations": record.suggestions,
        "timeline": [
            { "step": "Detection", "timestamp": detected, "status": "completed" },
            {
                "step": "Analysis",
                "timestamp": detected,
                "status": "completed",
                "duration_ms": record.processing_time_ms,
            },
            {
                "step": "Recommendations",
                "status": if record.suggestions.is_empty() { "pending" } else { "completed" },
            },
        ],
    })))
}

// ═══════════════════════════════════════════════════════════════
// Workflows
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct WorkflowsQuery {
    status: Option<String>,
}

async fn workflows(State(app): State<AppState>, Query(q): Query<WorkflowsQuery>) -> ApiResult {
    let workflows = match q.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let status = WorkflowStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown workflow status: {raw}")))?;
            app.workflows.all()?.into_iter().filter(|w| w.status == status).collect()
        }
        None => app.workflows.pending()?,
    };
    let count_of = |statuses: &[WorkflowStatus]| workflows.iter().filter(|w| statuses.contains(&w.status)).count();
    Ok(Json(json!({
        "count": workflows.len(),
        "stats": {
            "healthy": count_of(&[WorkflowStatus::Completed]),
            "warning": count_of(&[WorkflowStatus::Pending, WorkflowStatus::AwaitingApproval]),
            "failed": count_of(&[WorkflowStatus::Rejected, WorkflowStatus::Escalated, WorkflowStatus::Expired]),
        },
        "workflows": workflows,
    })))
}

fn load_workflow(app: &AppState, workflow_id: &str) -> Result<Workflow, ApiError> {
    app.workflows
        .get(workflow_id)?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".to_string()))
}

async fn workflow_detail(State(app): State<AppState>, Path(workflow_id): Path<String>) -> ApiResult {
    let workflow = load_workflow(&app, &workflow_id)?;
    let mut body = serde_json::to_value(&workflow).map_err(StateError::from)?;
    body["steps"] = serde_json::to_value(workflow.step_views()).map_err(StateError::from)?;
    Ok(Json(body))
}

#[derive(Debug, Default, Deserialize)]
struct AdvanceBody {
    action: Option<String>,
    actor_id: Option<String>,
    comment: Option<String>,
}

async fn workflow_advance(
    State(app): State<AppState>,
    Path(workflow_id): Path<String>,
    OptionalJsonBody(body): OptionalJsonBody<AdvanceBody>,
) -> ApiResult<Workflow> {
    let workflow = match body.action.as_deref().filter(|a| !a.is_empty()) {
        Some(action) => app.workflows.advance(&workflow_id, action, body.actor_id.as_deref())?,
        None => app.workflows.force_advance(
            &workflow_id,
            body.actor_id.as_deref().unwrap_or("admin"),
            body.comment.as_deref(),
        )?,
    };
    Ok(Json(workflow))
}

fn success(workflow: Workflow) -> ApiResult {
    Ok(Json(json!({ "success": true, "workflow": workflow })))
}

#[derive(Debug, Default, Deserialize)]
struct ApproveBody {
    actor_id: Option<String>,
}

async fn workflow_approve(
    State(app): State<AppState>,
    Path(workflow_id): Path<String>,
    OptionalJsonBody(body): OptionalJsonBody<ApproveBody>,
) -> ApiResult {
    success(app.workflows.approve(&workflow_id, body.actor_id.as_deref().unwrap_or("admin"))?)
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    reason: Option<String>,
    actor_id: Option<String>,
}

async fn workflow_reject(
    State(app): State<AppState>,
    Path(workflow_id): Path<String>,
    OptionalJsonBody(body): OptionalJsonBody<RejectBody>,
) -> ApiResult {
    let reason = body.reason.as_deref().unwrap_or("Rejected by admin");
    success(app.workflows.reject(&workflow_id, reason, body.actor_id.as_deref().unwrap_or("admin"))?)
}

#[derive(Debug, Default, Deserialize)]
struct UnblockBody {
    override_reason: Option<String>,
}

async fn workflow_unblock(
    State(app): State<AppState>,
    Path(workflow_id): Path<String>,
    OptionalJsonBody(body): OptionalJsonBody<UnblockBody>,
) -> ApiResult {
    success(app.workflows.unblock(&workflow_id, body.override_reason.as_deref().unwrap_or("Admin override"))?)
}

async fn workflow_reset(State(app): State<AppState>, Path(workflow_id): Path<String>) -> ApiResult {
    success(app.workflows.reset(&workflow_id)?)
}

// ═══════════════════════════════════════════════════════════════
// Policies and agents
// ═══════════════════════════════════════════════════════════════

fn last_audit_label(last: Option<f64>, now: f64) -> String {
    let Some(last) = last else {
        return "Never".to_string();
    };
    let ago = (now - last).max(0.0);
    if ago < 60.0 {
        "Just now".to_string()
    } else if ago < 3600.0 {
        format!("{}m ago", (ago / 60.0) as u64)
    } else if ago < 86_400.0 {
        format!("{}h ago", (ago / 3600.0) as u64)
    } else {
        "Yesterday".to_string()
    }
}

async fn policies(State(app): State<AppState>) -> ApiResult<Vec<Value>> {
    let now = now_unix();
    let since = now - 24.0 * 3600.0;
    let mut out = Vec::new();
    for rule in app.pipeline.rules().all_rules() {
        let (violations, last) = app.store.policy_violations(&rule.title_prefix(), since)?;
        let status = match (rule.enabled, violations) {
            (false, _) => "disabled",
            (true, 0) => "passing",
            (true, _) if rule.severity.is_high() => "failing",
            (true, _) => "warning",
        };
        out.push(json!({
            "id": rule.id,
            "name": rule.name,
            "description": rule.description,
            "category": rule.category,
            "severity": rule.severity,
            "enforcement": if rule.severity.is_high() { "Strict" } else { "Advisory" },
            "frameworks": rule.frameworks,
            "remediation": rule.remediation,
            "status": status,
            "violations_24h": violations,
            "lastAudit": last_audit_label(last, now),
        }));
    }
    Ok(Json(out))
}

async fn agents_status(State(app): State<AppState>) -> ApiResult {
    let agents = monitor::current_statuses(&app.store, 5)?;
    Ok(Json(json!({
        "count": agents.len(),
        "summary": monitor::summarize(&agents),
        "agents": agents,
    })))
}

async fn agent_findings(
    State(app): State<AppState>,
    Path(agent_id): Path<String>,
    Query(q): Query<HoursQuery>,
) -> ApiResult {
    let hours = q.clamped(24, 168);
    let findings = app.store.findings_by_agent(&agent_id, hours, 100)?;
    Ok(Json(json!({
        "agent_id": agent_id,
        "hours_covered": hours,
        "finding_count": findings.len(),
        "findings": findings,
    })))
}

// ═══════════════════════════════════════════════════════════════
// Chat
// ═══════════════════════════════════════════════════════════════

async fn chat_handler(State(app): State<AppState>, JsonBody(request): JsonBody<ChatRequest>) -> ApiResult<chat::ChatReply> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    Ok(Json(chat::respond(&app.store, app.llm.as_deref(), &request).await))
}

// ═══════════════════════════════════════════════════════════════
// Simulation
// ═══════════════════════════════════════════════════════════════

async fn simulation_start(State(app): State<AppState>) -> ApiResult {
    let status = simulation::start(&app)?;
    let mut body = serde_json::to_value(status).map_err(StateError::from)?;
    body["status"] = Value::from("started");
    body["message"] = Value::from("Workflow simulation started.");
    Ok(Json(body))
}

async fn simulation_stop(State(app): State<AppState>) -> ApiResult {
    let status = simulation::stop(&app)?;
    Ok(Json(json!({
        "status": "stopped",
        "message": "Workflow simulation stopped.",
        "events_generated": status.events_generated,
        "workflows_created": status.workflows_created,
    })))
}

async fn simulation_status(State(app): State<AppState>) -> Json<simulation::SimulationStatus> {
    Json(app.simulation.status())
}

async fn simulation_scenarios() -> Json<Value> {
    let scenarios = scenarios::scenario_summaries();
    Json(json!({ "count": scenarios.len(), "scenarios": scenarios }))
}

async fn simulation_run_scenario(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let Some(scenario) = scenarios::find_scenario(&name) else {
        let available: Vec<&str> = scenarios::SCRIPTED_SCENARIOS.iter().map(|s| s.id).collect();
        return Err(ApiError::NotFound(format!(
            "Scenario '{name}' not found. Available: {}",
            available.join(", ")
        )));
    };
    let correlation_id = scenarios::demo_correlation_id();
    let task_app = app.clone();
    let task_correlation = correlation_id.clone();
    tokio::spawn(async move {
        if let Err(e) = scenarios::execute_scenario(&task_app, scenario, &task_correlation).await {
            tracing::warn!(scenario = scenario.id, error = %e, "Scenario failed");
        }
    });
    Ok(Json(json!({
        "status": "scenario_started",
        "scenario": scenario.id,
        "correlation_id": correlation_id,
        "events_to_generate": scenario.events.len(),
        "message": format!("Running '{}' scenario...", scenario.name),
    })))
}

async fn simulation_quick_demo(State(app): State<AppState>) -> ApiResult {
    let created = scenarios::seed_quick_demo(&app)?;
    Ok(Json(json!({
        "status": "success",
        "message": "Demo data created successfully",
        "created": created,
    })))
}

// ═══════════════════════════════════════════════════════════════
// Realtime
// ═══════════════════════════════════════════════════════════════

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_loop(socket, app.hub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_status_bands() {
        assert_eq!(incident_status(0.2), "resolved");
        assert_eq!(incident_status(0.5), "investigating");
        assert_eq!(incident_status(0.79), "investigating");
        assert_eq!(incident_status(0.95), "active");
    }

    #[test]
    fn test_last_audit_label() {
        assert_eq!(last_audit_label(None, 100.0), "Never");
        assert_eq!(last_audit_label(Some(90.0), 100.0), "Just now");
        assert_eq!(last_audit_label(Some(0.0), 600.0), "10m ago");
        assert_eq!(last_audit_label(Some(0.0), 7_200.0), "2h ago");
        assert_eq!(last_audit_label(Some(0.0), 100_000.0), "Yesterday");
    }

    #[test]
    fn test_severity_query_parsing() {
        assert_eq!(parse_severity(None).unwrap(), None);
        assert_eq!(parse_severity(Some("")).unwrap(), None);
        assert_eq!(parse_severity(Some("critical")).unwrap(), Some(Severity::Critical));
        assert!(parse_severity(Some("urgent")).is_err());
    }

    fn json_request(body: &'static str, content_type: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method("POST").uri("/events");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        builder.body(axum::body::Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_body_with_unknown_severity_is_a_bad_request() {
        let req = json_request(
            r#"{"event_type":"x","source_system":"y","severity":"urgent"}"#,
            Some("application/json"),
        );
        let err = JsonBody::<StandardizedEvent>::from_request(req, &()).await.err().unwrap();
        let ApiError::BadRequest(detail) = &err else { panic!("expected BadRequest, got {err:?}") };
        assert!(detail.contains("urgent"), "detail names the bad value: {detail}");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_and_untyped_bodies_are_bad_requests() {
        let req = json_request("{not json", Some("application/json"));
        assert!(matches!(
            JsonBody::<StandardizedEvent>::from_request(req, &()).await,
            Err(ApiError::BadRequest(_))
        ));
        let req = json_request(r#"{"event_type":"x","source_system":"y"}"#, None);
        assert!(
            matches!(JsonBody::<StandardizedEvent>::from_request(req, &()).await, Err(ApiError::BadRequest(_))),
            "missing content type is rejected as 400"
        );
    }

    #[tokio::test]
    async fn test_optional_body_defaults_when_empty() {
        let OptionalJsonBody(body) = OptionalJsonBody::<RejectBody>::from_request(json_request("", None), &())
            .await
            .unwrap();
        assert!(body.reason.is_none() && body.actor_id.is_none());

        let OptionalJsonBody(body) =
            OptionalJsonBody::<RejectBody>::from_request(json_request(r#"{"reason":"freeze"}"#, None), &())
                .await
                .unwrap();
        assert_eq!(body.reason.as_deref(), Some("freeze"));

        let err = OptionalJsonBody::<RejectBody>::from_request(json_request("{\"reason\": 5}", None), &()).await;
        assert!(matches!(err, Err(ApiError::BadRequest(_))), "a present but invalid body is not ignored");
    }

    #[test]
    fn test_workflow_not_found_maps_to_404() {
        let response = ApiError::from(StateError::WorkflowNotFound("wf".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ApiError::from(StateError::WorkflowClosed("wf".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
