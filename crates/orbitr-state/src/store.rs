//! SQLite-backed audit store.
//!
//! Three tables:
//! - `audit_logs`: one row per processed event, with findings and insight as JSON
//! - `findings`: the same findings normalized for per-agent queries
//! - `workflows`: persisted compliance workflow state
//!
//! The connection lives behind `Arc<Mutex<_>>` so the store is cheap to clone
//! into HTTP handlers and background tasks.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use orbitr_protocol::{now_unix, AgentFinding, Domain, Severity, StandardizedEvent, DEMO_PREFIX};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::workflow::{Workflow, WorkflowStatus};
use crate::StateError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id                 TEXT PRIMARY KEY,
    correlation_id     TEXT NOT NULL,
    timestamp          REAL NOT NULL,
    event_type         TEXT NOT NULL,
    severity           TEXT NOT NULL,
    source_system      TEXT NOT NULL,
    domain             TEXT NOT NULL,
    actor_id           TEXT,
    resource_id        TEXT,
    findings_json      TEXT NOT NULL DEFAULT '[]',
    insight_text       TEXT NOT NULL DEFAULT '',
    suggestion_json    TEXT NOT NULL DEFAULT '[]',
    risk_score         REAL NOT NULL DEFAULT 0,
    processing_time_ms REAL NOT NULL DEFAULT 0,
    context_score      INTEGER NOT NULL DEFAULT 0,
    guardrails_passed  INTEGER NOT NULL DEFAULT 1,
    llm_used           INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_audit_correlation ON audit_logs(correlation_id);
CREATE INDEX IF NOT EXISTS idx_actor_timestamp ON audit_logs(actor_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_event_type_timestamp ON audit_logs(event_type, timestamp);
CREATE INDEX IF NOT EXISTS idx_severity_timestamp ON audit_logs(severity, timestamp);
CREATE INDEX IF NOT EXISTS idx_domain_severity ON audit_logs(domain, severity);

CREATE TABLE IF NOT EXISTS findings (
    id             TEXT PRIMARY KEY,
    audit_log_id   TEXT NOT NULL,
    timestamp      REAL NOT NULL,
    agent_id       TEXT NOT NULL,
    finding_type   TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    severity       TEXT NOT NULL,
    confidence     REAL NOT NULL,
    actor_id       TEXT,
    evidence_json  TEXT NOT NULL DEFAULT '{}',
    remediation    TEXT
);
CREATE INDEX IF NOT EXISTS idx_findings_audit ON findings(audit_log_id);
CREATE INDEX IF NOT EXISTS idx_findings_agent_timestamp ON findings(agent_id, timestamp);

CREATE TABLE IF NOT EXISTS workflows (
    workflow_id    TEXT PRIMARY KEY,
    workflow_type  TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     REAL NOT NULL,
    updated_at     REAL NOT NULL,
    requester_id   TEXT,
    approver_id    TEXT,
    current_step   INTEGER NOT NULL DEFAULT 0,
    steps_json     TEXT NOT NULL,
    metadata_json  TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
CREATE INDEX IF NOT EXISTS idx_workflows_correlation ON workflows(correlation_id);
"#;

const AUDIT_COLUMNS: &str = "id, correlation_id, timestamp, event_type, severity, source_system, \
     domain, actor_id, resource_id, findings_json, insight_text, suggestion_json, risk_score, \
     processing_time_ms, context_score, guardrails_passed, llm_used";

const FINDING_COLUMNS: &str = "id, audit_log_id, timestamp, agent_id, finding_type, title, \
     description, severity, confidence, actor_id, evidence_json, remediation";

const WORKFLOW_COLUMNS: &str = "workflow_id, workflow_type, correlation_id, status, created_at, \
     updated_at, requester_id, approver_id, current_step, steps_json, metadata_json";

/// One processed event as persisted in `audit_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub correlation_id: String,
    pub timestamp: f64,
    pub event_type: String,
    pub severity: Severity,
    pub source_system: String,
    pub domain: Domain,
    pub actor_id: Option<String>,
    pub resource_id: Option<String>,
    pub findings: Vec<AgentFinding>,
    pub insight_text: String,
    pub suggestions: Vec<String>,
    pub risk_score: f64,
    pub processing_time_ms: f64,
    pub context_score: u32,
    pub guardrails_passed: bool,
    pub llm_used: bool,
}

impl AuditRecord {
    /// A record for `event` with no analysis attached yet.
    pub fn for_event(event: &StandardizedEvent) -> Self {
        Self {
            id: event.event_id.clone(),
            correlation_id: event.correlation_id.clone(),
            timestamp: event.timestamp,
            event_type: event.event_type.clone(),
            severity: event.severity,
            source_system: event.source_system.clone(),
            domain: event.domain,
            actor_id: event.actor_hint(),
            resource_id: event.resource_hint(),
            findings: Vec::new(),
            insight_text: String::new(),
            suggestions: Vec::new(),
            risk_score: 0.0,
            processing_time_ms: 0.0,
            context_score: 0,
            guardrails_passed: true,
            llm_used: false,
        }
    }
}

/// Normalized finding row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFindingRow {
    pub id: String,
    pub audit_log_id: String,
    pub timestamp: f64,
    pub agent_id: String,
    pub finding_type: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub confidence: f64,
    pub actor_id: Option<String>,
    pub evidence: serde_json::Value,
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorEvent {
    pub event_id: String,
    pub event_type: String,
    pub severity: String,
    pub risk_score: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarEvent {
    pub event_id: String,
    pub severity: String,
    pub timestamp: f64,
    pub risk_score: f64,
}

/// Aggregates over a trailing time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_events: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub avg_risk_score: f64,
    pub avg_processing_time_ms: f64,
    /// Percentage of events whose insight used the LLM.
    pub llm_usage_rate: f64,
    pub hours_covered: u32,
}

/// Event totals for the hour ending at `hour_end` (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourlyCount {
    pub hour_end: f64,
    pub events: u64,
    pub critical: u64,
}

/// Most recent activity of one agent (or source system) in a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentActivity {
    pub last_activity: f64,
    pub finding_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetCounts {
    pub audit_logs: usize,
    pub findings: usize,
    pub workflows: usize,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn cutoff_hours(hours: u32) -> f64 {
    now_unix() - f64::from(hours) * 3600.0
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let severity: String = row.get(4)?;
    let domain: String = row.get(6)?;
    let findings_json: String = row.get(9)?;
    let suggestion_json: String = row.get(11)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        correlation_id: row.get(1)?,
        timestamp: row.get(2)?,
        event_type: row.get(3)?,
        severity: severity.parse().unwrap_or_default(),
        source_system: row.get(5)?,
        domain: Domain::from(domain),
        actor_id: row.get(7)?,
        resource_id: row.get(8)?,
        findings: serde_json::from_str(&findings_json).unwrap_or_default(),
        insight_text: row.get(10)?,
        suggestions: serde_json::from_str(&suggestion_json).unwrap_or_default(),
        risk_score: row.get(12)?,
        processing_time_ms: row.get(13)?,
        context_score: row.get(14)?,
        guardrails_passed: row.get(15)?,
        llm_used: row.get(16)?,
    })
}

fn finding_from_row(row: &Row<'_>) -> rusqlite::Result<AgentFindingRow> {
    let evidence_json: String = row.get(10)?;
    Ok(AgentFindingRow {
        id: row.get(0)?,
        audit_log_id: row.get(1)?,
        timestamp: row.get(2)?,
        agent_id: row.get(3)?,
        finding_type: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        severity: row.get(7)?,
        confidence: row.get(8)?,
        actor_id: row.get(9)?,
        evidence: serde_json::from_str(&evidence_json).unwrap_or(serde_json::Value::Null),
        remediation: row.get(11)?,
    })
}

fn workflow_from_row(row: &Row<'_>) -> rusqlite::Result<Workflow> {
    let status: String = row.get(3)?;
    let current_step: i64 = row.get(8)?;
    let steps_json: String = row.get(9)?;
    let metadata_json: String = row.get(10)?;
    Ok(Workflow {
        workflow_id: row.get(0)?,
        workflow_type: row.get(1)?,
        correlation_id: row.get(2)?,
        status: WorkflowStatus::parse(&status).unwrap_or(WorkflowStatus::Pending),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        requester_id: row.get(6)?,
        approver_id: row.get(7)?,
        current_step: usize::try_from(current_step).unwrap_or(0),
        steps: serde_json::from_str(&steps_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}

/// Handle to the Orbitr SQLite database.
#[derive(Clone)]
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
    /// Open (or create) the database file at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StateError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StateError> {
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn init_schema(conn: &Connection) -> Result<(), StateError> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    // ── Audit entries ───────────────────────────────────────────

    /// Persist an audit record and its normalized findings in one transaction.
    ///
    /// Finding ids are `<event_id>_f<i>`; a finding's actor comes from
    /// `evidence.actor` when present, otherwise from the record.
    pub fn save_audit_entry(&self, record: &AuditRecord) -> Result<(), StateError> {
        let findings_json = serde_json::to_string(&record.findings)?;
        let suggestion_json = serde_json::to_string(&record.suggestions)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO audit_logs ({AUDIT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                record.id,
                record.correlation_id,
                record.timestamp,
                record.event_type,
                record.severity.as_str(),
                record.source_system,
                record.domain.as_str(),
                record.actor_id,
                record.resource_id,
                findings_json,
                record.insight_text,
                suggestion_json,
                record.risk_score,
                record.processing_time_ms,
                record.context_score,
                record.guardrails_passed,
                record.llm_used,
            ],
        )?;

        tx.execute("DELETE FROM findings WHERE audit_log_id = ?1", params![record.id])?;
        for (i, finding) in record.findings.iter().enumerate() {
            let finding_actor = finding
                .evidence
                .get("actor")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| record.actor_id.clone());
            tx.execute(
                &format!(
                    "INSERT INTO findings ({FINDING_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    format!("{}_f{}", record.id, i),
                    record.id,
                    record.timestamp,
                    finding.agent_id,
                    finding.finding_type,
                    finding.title,
                    finding.description,
                    finding.severity.as_str(),
                    finding.confidence,
                    finding_actor,
                    serde_json::to_string(&finding.evidence)?,
                    finding.remediation,
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!(
            event_id = %record.id,
            event_type = %record.event_type,
            findings = record.findings.len(),
            "Saved audit entry"
        );
        Ok(())
    }

    /// Most recent audit records, optionally filtered by severity and actor.
    pub fn recent_audit(
        &self,
        limit: usize,
        severity: Option<Severity>,
        actor_id: Option<&str>,
    ) -> Result<Vec<AuditRecord>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs \
             WHERE (?1 IS NULL OR severity = ?1) AND (?2 IS NULL OR actor_id = ?2) \
             ORDER BY timestamp DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![severity.map(|s| s.as_str()), actor_id, limit as i64],
            audit_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn audit_by_correlation(&self, correlation_id: &str) -> Result<Option<AuditRecord>, StateError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE correlation_id = ?1 \
                     ORDER BY timestamp DESC LIMIT 1"
                ),
                params![correlation_id],
                audit_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// High and Critical audit records, newest first.
    pub fn incidents(&self, severity: Option<Severity>, limit: usize) -> Result<Vec<AuditRecord>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs \
             WHERE severity IN ('High', 'Critical') AND (?1 IS NULL OR severity = ?1) \
             ORDER BY timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![severity.map(|s| s.as_str()), limit as i64], audit_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn events_by_actor(&self, actor_id: &str, hours: u32, limit: usize) -> Result<Vec<ActorEvent>, StateError> {
        if actor_id.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, severity, risk_score, timestamp FROM audit_logs \
             WHERE actor_id = ?1 AND timestamp > ?2 ORDER BY timestamp DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![actor_id, cutoff_hours(hours), limit as i64], |row| {
            Ok(ActorEvent {
                event_id: row.get(0)?,
                event_type: row.get(1)?,
                severity: row.get(2)?,
                risk_score: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn similar_events(&self, event_type: &str, hours: u32, limit: usize) -> Result<Vec<SimilarEvent>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, severity, timestamp, risk_score FROM audit_logs \
             WHERE event_type = ?1 AND timestamp > ?2 ORDER BY timestamp DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![event_type, cutoff_hours(hours), limit as i64], |row| {
            Ok(SimilarEvent {
                event_id: row.get(0)?,
                severity: row.get(1)?,
                timestamp: row.get(2)?,
                risk_score: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of events of `event_type` newer than `since` (unix seconds).
    pub fn count_event_type_since(&self, event_type: &str, since: f64) -> Result<u64, StateError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_logs WHERE event_type = ?1 AND timestamp > ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Event counts for each of the last `hours` one-hour windows ending
    /// now, oldest first.
    pub fn hourly_counts(&self, hours: u32) -> Result<Vec<HourlyCount>, StateError> {
        self.hourly_counts_until(hours, now_unix())
    }

    pub fn hourly_counts_until(&self, hours: u32, end: f64) -> Result<Vec<HourlyCount>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN severity IN ('High', 'Critical') THEN 1 ELSE 0 END), 0) \
             FROM audit_logs WHERE timestamp >= ?1 AND timestamp < ?2",
        )?;
        let mut buckets = Vec::with_capacity(hours as usize);
        for i in (0..hours).rev() {
            let hour_end = end - f64::from(i) * 3600.0;
            let (events, critical): (i64, i64) =
                stmt.query_row(params![hour_end - 3600.0, hour_end], |row| Ok((row.get(0)?, row.get(1)?)))?;
            buckets.push(HourlyCount { hour_end, events: events.max(0) as u64, critical: critical.max(0) as u64 });
        }
        Ok(buckets)
    }

    pub fn summary_stats(&self, hours: u32) -> Result<SummaryStats, StateError> {
        let cutoff = cutoff_hours(hours);
        let conn = self.conn()?;

        let (total, avg_risk, avg_time, llm_count): (i64, Option<f64>, Option<f64>, i64) = conn.query_row(
            "SELECT COUNT(*), AVG(risk_score), AVG(processing_time_ms), \
                    COALESCE(SUM(CASE WHEN llm_used THEN 1 ELSE 0 END), 0) \
             FROM audit_logs WHERE timestamp > ?1",
            params![cutoff],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut by_severity: BTreeMap<String, u64> =
            Severity::ALL.iter().map(|s| (s.as_str().to_string(), 0)).collect();
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM audit_logs WHERE timestamp > ?1 GROUP BY severity",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (severity, count) = row?;
            if let Some(slot) = by_severity.get_mut(&severity) {
                *slot = count.max(0) as u64;
            }
        }

        let total = total.max(0) as u64;
        let llm_usage_rate = if total > 0 {
            round_to(llm_count as f64 / total as f64 * 100.0, 1)
        } else {
            0.0
        };

        Ok(SummaryStats {
            total_events: total,
            by_severity,
            avg_risk_score: round_to(avg_risk.unwrap_or(0.0), 3),
            avg_processing_time_ms: round_to(avg_time.unwrap_or(0.0), 2),
            llm_usage_rate,
            hours_covered: hours,
        })
    }

    // ── Findings ────────────────────────────────────────────────

    pub fn findings_by_agent(&self, agent_id: &str, hours: u32, limit: usize) -> Result<Vec<AgentFindingRow>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings WHERE agent_id = ?1 AND timestamp > ?2 \
             ORDER BY timestamp DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![agent_id, cutoff_hours(hours), limit as i64], finding_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn recent_findings(&self, limit: usize) -> Result<Vec<AgentFindingRow>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings ORDER BY timestamp DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], finding_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Count of findings whose title starts with `title_prefix` since `since`,
    /// with the newest matching timestamp.
    pub fn policy_violations(&self, title_prefix: &str, since: f64) -> Result<(u64, Option<f64>), StateError> {
        let conn = self.conn()?;
        let (count, last): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), MAX(timestamp) FROM findings \
             WHERE substr(title, 1, length(?1)) = ?1 AND timestamp > ?2",
            params![title_prefix, since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count.max(0) as u64, last))
    }

    /// Newest audit timestamp per source system since `since`.
    pub fn source_activity(&self, since: f64) -> Result<HashMap<String, f64>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_system, MAX(timestamp) FROM audit_logs WHERE timestamp > ?1 GROUP BY source_system",
        )?;
        let rows = stmt.query_map(params![since], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
        Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
    }

    /// Latest activity per agent since `since`: findings by agent id, merged
    /// with [`source_activity`](Self::source_activity) for agents that raise
    /// no findings.
    pub fn agent_activity(&self, since: f64) -> Result<HashMap<String, AgentActivity>, StateError> {
        let sources = self.source_activity(since)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT agent_id, MAX(timestamp), COUNT(*) FROM findings WHERE timestamp > ?1 GROUP BY agent_id",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
        })?;
        let mut activity = HashMap::new();
        for row in rows {
            let (agent_id, last_activity, count) = row?;
            activity.insert(
                agent_id,
                AgentActivity { last_activity, finding_count: count.max(0) as u64 },
            );
        }
        for (source, last_activity) in sources {
            activity
                .entry(source)
                .or_insert(AgentActivity { last_activity, finding_count: 0 });
        }
        Ok(activity)
    }

    // ── Workflows ───────────────────────────────────────────────

    pub fn save_workflow(&self, workflow: &Workflow) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO workflows ({WORKFLOW_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                workflow.workflow_id,
                workflow.workflow_type,
                workflow.correlation_id,
                workflow.status.as_str(),
                workflow.created_at,
                workflow.updated_at,
                workflow.requester_id,
                workflow.approver_id,
                workflow.current_step as i64,
                serde_json::to_string(&workflow.steps)?,
                serde_json::to_string(&workflow.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn load_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, StateError> {
        let conn = self.conn()?;
        let workflow = conn
            .query_row(
                &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = ?1"),
                params![workflow_id],
                workflow_from_row,
            )
            .optional()?;
        Ok(workflow)
    }

    /// All workflows, newest first.
    pub fn list_workflows(&self) -> Result<Vec<Workflow>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], workflow_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn workflows_by_correlation(&self, correlation_id: &str) -> Result<Vec<Workflow>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE correlation_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![correlation_id], workflow_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── Maintenance ─────────────────────────────────────────────

    /// Delete every row in every table.
    pub fn reset(&self) -> Result<ResetCounts, StateError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let counts = ResetCounts {
            findings: tx.execute("DELETE FROM findings", [])?,
            audit_logs: tx.execute("DELETE FROM audit_logs", [])?,
            workflows: tx.execute("DELETE FROM workflows", [])?,
        };
        tx.commit()?;
        tracing::warn!(
            audit_logs = counts.audit_logs,
            findings = counts.findings,
            workflows = counts.workflows,
            "Audit store reset"
        );
        Ok(counts)
    }

    /// Delete rows created by the quick demo (ids prefixed with `demo_`).
    pub fn clear_demo_data(&self) -> Result<ResetCounts, StateError> {
        // Exact, case-sensitive prefix match; LIKE treats `_` as a wildcard.
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let counts = ResetCounts {
            findings: tx.execute(
                "DELETE FROM findings WHERE substr(audit_log_id, 1, length(?1)) = ?1",
                params![DEMO_PREFIX],
            )?,
            audit_logs: tx.execute("DELETE FROM audit_logs WHERE substr(id, 1, length(?1)) = ?1", params![DEMO_PREFIX])?,
            workflows: tx.execute(
                "DELETE FROM workflows WHERE substr(correlation_id, 1, length(?1)) = ?1",
                params![DEMO_PREFIX],
            )?,
        };
        tx.commit()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, severity: Severity, actor: Option<&str>) -> AuditRecord {
        let mut ev = StandardizedEvent::new("ssh_login", "bastion").with_severity(severity);
        ev.event_id = id.to_string();
        ev.correlation_id = format!("corr-{id}");
        ev.actor_id = actor.map(str::to_string);
        AuditRecord::for_event(&ev)
    }

    #[test]
    fn test_save_and_fetch_by_correlation() {
        let store = AuditStore::open_in_memory().unwrap();
        let mut rec = record("e1", Severity::High, Some("alice"));
        rec.findings.push(AgentFinding::new("security_watchdog", "x", "t", Severity::High, 0.9));
        rec.suggestions.push("Rotate keys".into());
        store.save_audit_entry(&rec).unwrap();

        let fetched = store.audit_by_correlation("corr-e1").unwrap().unwrap();
        assert_eq!(fetched.id, "e1");
        assert_eq!(fetched.findings.len(), 1);
        assert_eq!(fetched.suggestions, vec!["Rotate keys".to_string()]);
        assert_eq!(fetched.severity, Severity::High);
    }

    #[test]
    fn test_findings_are_normalized_with_indexed_ids() {
        let store = AuditStore::open_in_memory().unwrap();
        let mut rec = record("e2", Severity::Medium, Some("bob"));
        rec.findings.push(AgentFinding::new("cost_analyst", "a", "first", Severity::Medium, 0.5));
        rec.findings.push(
            AgentFinding::new("cost_analyst", "b", "second", Severity::Low, 0.5).evidence("actor", "carol"),
        );
        store.save_audit_entry(&rec).unwrap();

        let rows = store.findings_by_agent("cost_analyst", 1, 10).unwrap();
        assert_eq!(rows.len(), 2);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"e2_f0") && ids.contains(&"e2_f1"));
        let second = rows.iter().find(|r| r.id == "e2_f1").unwrap();
        assert_eq!(second.actor_id.as_deref(), Some("carol"), "evidence actor wins");
    }

    #[test]
    fn test_summary_stats_counts_severity() {
        let store = AuditStore::open_in_memory().unwrap();
        store.save_audit_entry(&record("a", Severity::High, None)).unwrap();
        store.save_audit_entry(&record("b", Severity::Low, None)).unwrap();
        let mut llm = record("c", Severity::Critical, None);
        llm.llm_used = true;
        store.save_audit_entry(&llm).unwrap();

        let stats = store.summary_stats(24).unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.by_severity["High"], 1);
        assert_eq!(stats.by_severity["Medium"], 0);
        assert!((stats.llm_usage_rate - 33.3).abs() < 1e-9);
    }

    #[test]
    fn test_incidents_only_high_and_critical() {
        let store = AuditStore::open_in_memory().unwrap();
        store.save_audit_entry(&record("a", Severity::High, None)).unwrap();
        store.save_audit_entry(&record("b", Severity::Medium, None)).unwrap();
        store.save_audit_entry(&record("c", Severity::Critical, None)).unwrap();
        assert_eq!(store.incidents(None, 20).unwrap().len(), 2);
        assert_eq!(store.incidents(Some(Severity::Critical), 20).unwrap().len(), 1);
    }

    #[test]
    fn test_hourly_counts_bucket_by_hour_oldest_first() {
        let store = AuditStore::open_in_memory().unwrap();
        let end = 1_800_000_000.0;
        for (id, severity, age) in [
            ("h1", Severity::Critical, 600.0),
            ("h2", Severity::Low, 1200.0),
            ("h3", Severity::High, 2.5 * 3600.0),
            ("old", Severity::Critical, 30.0 * 3600.0),
        ] {
            let mut rec = record(id, severity, None);
            rec.timestamp = end - age;
            store.save_audit_entry(&rec).unwrap();
        }

        let buckets = store.hourly_counts_until(3, end).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[2].hour_end, end, "newest bucket is last");
        assert_eq!((buckets[2].events, buckets[2].critical), (2, 1));
        assert_eq!((buckets[1].events, buckets[1].critical), (0, 0));
        assert_eq!((buckets[0].events, buckets[0].critical), (1, 1));
    }

    #[test]
    fn test_source_activity_feeds_agent_activity() {
        let store = AuditStore::open_in_memory().unwrap();
        let mut rec = record("s1", Severity::High, None);
        rec.findings.push(AgentFinding::new("security_watchdog", "x", "t", Severity::High, 0.9));
        store.save_audit_entry(&rec).unwrap();

        let since = now_unix() - 3600.0;
        let sources = store.source_activity(since).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources.contains_key("bastion"), "keyed by source system");

        let activity = store.agent_activity(since).unwrap();
        assert_eq!(activity["security_watchdog"].finding_count, 1);
        assert_eq!(activity["bastion"].finding_count, 0, "sources without findings still show up");
    }

    #[test]
    fn test_clear_demo_data_keeps_real_rows() {
        let store = AuditStore::open_in_memory().unwrap();
        store.save_audit_entry(&record("demo_1", Severity::High, None)).unwrap();
        store.save_audit_entry(&record("real", Severity::High, None)).unwrap();
        store.save_audit_entry(&record("DEMOX-real", Severity::High, None)).unwrap();
        store.save_audit_entry(&record("demo-real", Severity::High, None)).unwrap();
        let counts = store.clear_demo_data().unwrap();
        assert_eq!(counts.audit_logs, 1, "only the exact demo_ prefix is cleared");
        assert_eq!(store.recent_audit(10, None, None).unwrap().len(), 3);
    }
}
