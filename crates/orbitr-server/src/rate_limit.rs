//! Per-source ingestion budgets.
//!
//! Each `source_system` draws from its own refilling budget of events. Source
//! names come from clients, so the table is bounded: budgets that have
//! refilled completely are forgotten (a fresh budget is identical), and when
//! the table is still full the source seen least recently is dropped.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::RateLimitConfig;

struct SourceBudget {
    remaining: f64,
    seen_at: Instant,
}

pub struct RateLimiter {
    budgets: HashMap<String, SourceBudget>,
    burst: f64,
    refill_per_sec: f64,
    max_sources: usize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            budgets: HashMap::new(),
            burst: f64::from(config.capacity),
            refill_per_sec: config.refill_per_sec.max(0.0),
            max_sources: config.max_sources.max(1),
        }
    }

    /// Admit one event from `source`, or refuse it when the budget is spent.
    pub fn check(&mut self, source: &str) -> bool {
        self.check_at(source, Instant::now())
    }

    pub fn check_at(&mut self, source: &str, now: Instant) -> bool {
        if !self.budgets.contains_key(source) && self.budgets.len() >= self.max_sources {
            self.make_room(now);
        }
        let (burst, rate) = (self.burst, self.refill_per_sec);
        let budget = self
            .budgets
            .entry(source.to_string())
            .or_insert(SourceBudget { remaining: burst, seen_at: now });
        let refilled = budget.remaining + now.saturating_duration_since(budget.seen_at).as_secs_f64() * rate;
        budget.remaining = refilled.min(burst);
        budget.seen_at = now;
        if budget.remaining < 1.0 {
            return false;
        }
        budget.remaining -= 1.0;
        true
    }

    fn make_room(&mut self, now: Instant) {
        let (burst, rate) = (self.burst, self.refill_per_sec);
        self.budgets.retain(|_, b| {
            b.remaining + now.saturating_duration_since(b.seen_at).as_secs_f64() * rate < burst
        });
        if self.budgets.len() < self.max_sources {
            return;
        }
        let stalest = self.budgets.iter().min_by_key(|(_, b)| b.seen_at).map(|(source, _)| source.clone());
        if let Some(source) = stalest {
            tracing::debug!(%source, "Rate limit table full, dropping stalest source");
            self.budgets.remove(&source);
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.budgets.len()
    }

    pub fn reset(&mut self) {
        self.budgets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(capacity: u32, refill_per_sec: f64, max_sources: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig { capacity, refill_per_sec, max_sources })
    }

    #[test]
    fn test_burst_is_admitted_then_refused() {
        let mut rl = limiter(3, 0.0, 10);
        for _ in 0..3 {
            assert!(rl.check("github"), "burst fits the budget");
        }
        assert!(!rl.check("github"), "fourth event exceeds a burst of three");
        assert!(rl.check("jenkins"), "other sources have their own budget");
    }

    #[test]
    fn test_budget_refills_over_time() {
        let mut rl = limiter(1, 2.0, 10);
        let start = Instant::now();
        assert!(rl.check_at("github", start));
        assert!(!rl.check_at("github", start));
        assert!(rl.check_at("github", start + Duration::from_millis(600)), "half a second refills one event");
    }

    #[test]
    fn test_table_stays_bounded_under_many_sources() {
        let mut rl = limiter(5, 0.0, 4);
        let start = Instant::now();
        for i in 0..100u64 {
            assert!(rl.check_at(&format!("spoofed-{i}"), start + Duration::from_millis(i)));
            assert!(rl.tracked_sources() <= 4, "never more than max_sources budgets");
        }
        assert_eq!(rl.tracked_sources(), 4);
    }

    #[test]
    fn test_refilled_budgets_are_forgotten_first() {
        let mut rl = limiter(2, 1.0, 2);
        let start = Instant::now();
        assert!(rl.check_at("idle", start));
        for _ in 0..2 {
            assert!(rl.check_at("busy", start + Duration::from_secs(5)));
        }
        assert!(rl.check_at("new", start + Duration::from_secs(5)));
        assert!(!rl.check_at("busy", start + Duration::from_secs(5)), "spent budget survived the prune");
        assert_eq!(rl.tracked_sources(), 2);
    }

    #[test]
    fn test_reset_refills_everyone() {
        let mut rl = limiter(1, 0.0, 10);
        assert!(rl.check("github"));
        rl.reset();
        assert!(rl.check("github"));
        assert_eq!(rl.tracked_sources(), 1);
    }
}
