//! Historical context for pattern detection.
//!
//! Agents look back at past events to spot repeat offenders, bursts of the
//! same event type and severity deviations. Lookups go through the
//! [`HistorySource`] trait so agents can run against an in-memory fake.
//! A failed lookup is logged and treated as "no history": analysis of the
//! current event must not fail because the past is unavailable.

use serde::{Deserialize, Serialize};

use orbitr_protocol::now_unix;

use crate::store::{ActorEvent, AuditStore, SimilarEvent};
use crate::StateError;

/// Read access to past events.
pub trait HistorySource: Send + Sync {
    fn similar_events(&self, event_type: &str, hours: u32, limit: usize) -> Result<Vec<SimilarEvent>, StateError>;

    fn count_event_type_since(&self, event_type: &str, since: f64) -> Result<u64, StateError>;

    fn events_by_actor(&self, actor_id: &str, hours: u32, limit: usize) -> Result<Vec<ActorEvent>, StateError>;
}

impl HistorySource for AuditStore {
    fn similar_events(&self, event_type: &str, hours: u32, limit: usize) -> Result<Vec<SimilarEvent>, StateError> {
        AuditStore::similar_events(self, event_type, hours, limit)
    }

    fn count_event_type_since(&self, event_type: &str, since: f64) -> Result<u64, StateError> {
        AuditStore::count_event_type_since(self, event_type, since)
    }

    fn events_by_actor(&self, actor_id: &str, hours: u32, limit: usize) -> Result<Vec<ActorEvent>, StateError> {
        AuditStore::events_by_actor(self, actor_id, hours, limit)
    }
}

/// Result of a frequency check for one event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyAnomaly {
    pub is_anomaly: bool,
    pub count_in_window: u64,
    pub threshold: u64,
    pub window_hours: u32,
    /// `count / threshold`, capped at 2.0.
    pub anomaly_score: f64,
}

/// Historical risk profile of one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRiskProfile {
    pub risk_score: f64,
    pub events_count: usize,
    pub high_severity_count: usize,
    pub is_repeat_offender: bool,
}

impl ActorRiskProfile {
    fn unknown() -> Self {
        Self { risk_score: 0.5, events_count: 0, high_severity_count: 0, is_repeat_offender: false }
    }
}

/// Number of High/Critical events after which an actor is a repeat offender.
pub const REPEAT_OFFENDER_THRESHOLD: usize = 3;

/// Infallible history queries over a [`HistorySource`].
pub struct EventHistory<'a> {
    source: &'a dyn HistorySource,
}

impl<'a> EventHistory<'a> {
    pub fn new(source: &'a dyn HistorySource) -> Self {
        Self { source }
    }

    pub fn similar_events(&self, event_type: &str, hours: u32, limit: usize) -> Vec<SimilarEvent> {
        self.source
            .similar_events(event_type, hours, limit)
            .unwrap_or_else(|e| {
                tracing::warn!(event_type, error = %e, "Similar-event lookup failed");
                Vec::new()
            })
    }

    pub fn frequency_anomaly(&self, event_type: &str, window_hours: u32, threshold: u64) -> FrequencyAnomaly {
        let since = now_unix() - f64::from(window_hours) * 3600.0;
        let count = self
            .source
            .count_event_type_since(event_type, since)
            .unwrap_or_else(|e| {
                tracing::warn!(event_type, error = %e, "Frequency lookup failed");
                0
            });
        frequency_from_count(count, window_hours, threshold)
    }

    pub fn actor_risk_history(&self, actor_id: &str, days: u32) -> ActorRiskProfile {
        if actor_id.is_empty() {
            return ActorRiskProfile::unknown();
        }
        let events = self
            .source
            .events_by_actor(actor_id, days * 24, 500)
            .unwrap_or_else(|e| {
                tracing::warn!(actor_id, error = %e, "Actor history lookup failed");
                Vec::new()
            });
        risk_profile(&events)
    }
}

pub fn frequency_from_count(count: u64, window_hours: u32, threshold: u64) -> FrequencyAnomaly {
    let anomaly_score = if threshold > 0 {
        (count as f64 / threshold as f64).min(2.0)
    } else {
        0.0
    };
    FrequencyAnomaly {
        is_anomaly: threshold > 0 && count >= threshold,
        count_in_window: count,
        threshold,
        window_hours,
        anomaly_score,
    }
}

pub fn risk_profile(events: &[ActorEvent]) -> ActorRiskProfile {
    if events.is_empty() {
        return ActorRiskProfile::unknown();
    }
    let high = events
        .iter()
        .filter(|e| e.severity == "High" || e.severity == "Critical")
        .count();
    let avg = events.iter().map(|e| e.risk_score).sum::<f64>() / events.len() as f64;
    ActorRiskProfile {
        risk_score: avg,
        events_count: events.len(),
        high_severity_count: high,
        is_repeat_offender: high >= REPEAT_OFFENDER_THRESHOLD,
    }
}
