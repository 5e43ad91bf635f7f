//! Generated reports, kept in memory for the life of the server.

use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use orbitr_state::workflow::title_case;
use orbitr_state::SummaryStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub report_type: String,
    pub date: String,
    pub status: String,
    pub hours_covered: u32,
    pub summary: SummaryStats,
}

/// Window a report type covers.
pub fn report_window_hours(report_type: &str) -> u32 {
    match report_type.to_ascii_lowercase().as_str() {
        "weekly" | "weekly_summary" => 168,
        "monthly" => 720,
        _ => 24,
    }
}

#[derive(Default)]
pub struct ReportStore {
    reports: Mutex<Vec<Report>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self, report_type: &str, summary: SummaryStats) -> Report {
        let report = Report {
            id: format!("RPT-{}", &uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()),
            title: format!("{} Report", title_case(report_type)),
            report_type: title_case(report_type),
            date: Utc::now().to_rfc3339(),
            status: "Generated".to_string(),
            hours_covered: summary.hours_covered,
            summary,
        };
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
        tracing::info!(report_id = %report.id, report_type, "Report generated");
        report
    }

    pub fn all(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn stats(hours: u32) -> SummaryStats {
        SummaryStats {
            total_events: 3,
            by_severity: BTreeMap::new(),
            avg_risk_score: 0.4,
            avg_processing_time_ms: 12.0,
            llm_usage_rate: 0.0,
            hours_covered: hours,
        }
    }

    #[test]
    fn test_generate_names_and_stores_report() {
        let store = ReportStore::new();
        let report = store.generate("security_audit", stats(24));
        assert!(report.id.starts_with("RPT-"));
        assert_eq!(report.id.len(), 12);
        assert_eq!(report.id[4..], report.id[4..].to_uppercase());
        assert_eq!(report.title, "Security Audit Report");
        assert_eq!(report.report_type, "Security Audit");
        assert_eq!(report.status, "Generated");
        assert_eq!(store.all().len(), 1);

        store.clear();
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_window_by_type() {
        assert_eq!(report_window_hours("weekly"), 168);
        assert_eq!(report_window_hours("Monthly"), 720);
        assert_eq!(report_window_hours("compliance"), 24);
    }

    #[test]
    fn test_type_serializes_as_type() {
        let report = ReportStore::new().generate("daily", stats(24));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["type"], "Daily");
        assert_eq!(value["summary"]["total_events"], 3);
    }
}
