//! Workflow simulation: a continuous event stream, scripted scenarios and
//! quick-demo seed data.
//!
//! Every tick the loop emits a host metric (CPU drifting within 10..=99 %,
//! memory within 20..=95 %) and, with probability `event_probability`, one
//! SDLC event from [`generator::ScenarioGenerator`] that goes through the
//! full ingestion path and may open a workflow.

pub mod generator;
pub mod scenarios;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};

use orbitr_protocol::{Domain, Severity, StandardizedEvent};

use crate::realtime::EVENT_SIMULATION_STATUS;
use crate::state::AppState;
use generator::ScenarioGenerator;

const CPU_THRESHOLD: i64 = 80;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub events_generated: u64,
    pub workflows_created: u64,
    pub uptime_seconds: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimulationError {
    #[error("Simulation already running")]
    AlreadyRunning,
    #[error("Simulation not running")]
    NotRunning,
}

#[derive(Default)]
struct Inner {
    running: bool,
    started_at: Option<DateTime<Utc>>,
    events_generated: u64,
    workflows_created: u64,
}

/// Start/stop state of the background simulation loop.
///
/// Each start bumps a generation counter; a loop exits as soon as the
/// generation it was started with is no longer current, so a quick
/// stop/start never leaves two loops running.
#[derive(Default)]
pub struct SimulationController {
    inner: Mutex<Inner>,
    generation: AtomicU64,
}

impl SimulationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().map(|i| i.running).unwrap_or(false)
    }

    pub fn status(&self) -> SimulationStatus {
        let Ok(inner) = self.inner.lock() else {
            return SimulationStatus::default();
        };
        let uptime_seconds = inner
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        SimulationStatus {
            running: inner.running,
            started_at: inner.started_at,
            events_generated: inner.events_generated,
            workflows_created: inner.workflows_created,
            uptime_seconds,
        }
    }

    /// Mark the simulation running and return the generation to run under.
    fn begin(&self) -> Result<u64, SimulationError> {
        let mut inner = self.inner.lock().map_err(|_| SimulationError::NotRunning)?;
        if inner.running {
            return Err(SimulationError::AlreadyRunning);
        }
        *inner = Inner { running: true, started_at: Some(Utc::now()), ..Default::default() };
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn end(&self) -> Result<SimulationStatus, SimulationError> {
        {
            let mut inner = self.inner.lock().map_err(|_| SimulationError::NotRunning)?;
            if !inner.running {
                return Err(SimulationError::NotRunning);
            }
            inner.running = false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(self.status())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn record(&self, events: u64, workflows: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.events_generated += events;
            inner.workflows_created += workflows;
        }
    }
}

fn status_value(status: &SimulationStatus) -> Value {
    serde_json::to_value(status).unwrap_or(Value::Null)
}

/// Start the loop on `app`'s runtime.
pub fn start(app: &AppState) -> Result<SimulationStatus, SimulationError> {
    let generation = app.simulation.begin()?;
    let status = app.simulation.status();
    app.hub.publish(EVENT_SIMULATION_STATUS, status_value(&status));
    tracing::info!(generation, "Simulation started");
    tokio::spawn(run_loop(app.clone(), generation));
    Ok(status)
}

pub fn stop(app: &AppState) -> Result<SimulationStatus, SimulationError> {
    let status = app.simulation.end()?;
    app.hub.publish(EVENT_SIMULATION_STATUS, status_value(&status));
    tracing::info!(
        events = status.events_generated,
        workflows = status.workflows_created,
        "Simulation stopped"
    );
    Ok(status)
}

/// Drifting host metrics fed to the resource watcher.
struct HostMetrics {
    cpu: i64,
    memory: i64,
}

impl HostMetrics {
    fn drift(&mut self, rng: &mut impl Rng) {
        self.cpu = (self.cpu + rng.gen_range(-5..=8)).clamp(10, 99);
        self.memory = (self.memory + rng.gen_range(-2..=4)).clamp(20, 95);
    }

    fn event(&self) -> StandardizedEvent {
        let severity = if self.cpu > CPU_THRESHOLD { Severity::Medium } else { Severity::Low };
        let mut event = StandardizedEvent::new("ResourceMetric", "node_monitor")
            .with_severity(severity)
            .with_domain(Domain::Infrastructure)
            .with_payload(json!({
                "metric": "cpu_utilization",
                "value": self.cpu,
                "memory_pct": self.memory,
                "threshold": CPU_THRESHOLD,
            }));
        event.event_id = format!("metric_{}", Utc::now().timestamp_millis());
        event.actor_id = Some("system".to_string());
        event.resource_id = Some("prod-app-server-01".to_string());
        event
    }
}

async fn run_loop(app: AppState, generation: u64) {
    let tick = Duration::from_millis(app.config.simulation.tick_ms.max(100));
    let probability = app.config.simulation.event_probability.clamp(0.0, 1.0);
    let mut generator = ScenarioGenerator::new();
    let mut metrics = HostMetrics { cpu: 30, memory: 40 };
    let mut rng = rand::rngs::StdRng::from_entropy();

    while app.simulation.is_current(generation) {
        metrics.drift(&mut rng);
        let metric_app = app.clone();
        let metric = metrics.event();
        tokio::spawn(async move {
            metric_app.analyze(metric).await;
        });
        app.simulation.record(1, 0);

        if rng.gen_bool(probability) {
            let event = generator.generate_random_event();
            match app.process_event(event).await {
                Ok(outcome) => app.simulation.record(1, u64::from(outcome.workflow.is_some())),
                Err(e) => {
                    tracing::warn!(error = %e, "Simulated event failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            }
        }
        tokio::time::sleep(tick).await;
    }
    tracing::debug!(generation, "Simulation loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_twice_and_stop_twice_are_rejected() {
        let controller = SimulationController::new();
        let generation = controller.begin().unwrap();
        assert!(controller.is_current(generation));
        assert_eq!(controller.begin(), Err(SimulationError::AlreadyRunning));

        controller.record(3, 1);
        let stopped = controller.end().unwrap();
        assert!(!stopped.running);
        assert_eq!(stopped.events_generated, 3);
        assert_eq!(stopped.workflows_created, 1);
        assert!(!controller.is_current(generation), "stop retires the running loop");
        assert_eq!(controller.end().unwrap_err(), SimulationError::NotRunning);
    }

    #[test]
    fn test_restart_resets_counters() {
        let controller = SimulationController::new();
        controller.begin().unwrap();
        controller.record(5, 2);
        controller.end().unwrap();
        controller.begin().unwrap();
        let status = controller.status();
        assert!(status.running);
        assert_eq!(status.events_generated, 0);
        assert!(status.started_at.is_some());
    }

    #[test]
    fn test_metrics_stay_in_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut metrics = HostMetrics { cpu: 30, memory: 40 };
        for _ in 0..1_000 {
            metrics.drift(&mut rng);
            assert!((10..=99).contains(&metrics.cpu));
            assert!((20..=95).contains(&metrics.memory));
        }
    }

    #[test]
    fn test_metric_event_severity_follows_threshold() {
        let hot = HostMetrics { cpu: 91, memory: 50 }.event();
        assert_eq!(hot.severity, Severity::Medium);
        assert_eq!(hot.payload["threshold"], 80);
        assert_eq!(hot.resource_id.as_deref(), Some("prod-app-server-01"));

        let cool = HostMetrics { cpu: 40, memory: 50 }.event();
        assert_eq!(cool.severity, Severity::Low);
        assert_eq!(cool.domain, Domain::Infrastructure);
    }
}
