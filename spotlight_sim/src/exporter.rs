//! JSON exporter for rotation traces.
//!
//! Writes one run's trace and outcome so a timeline can be inspected or
//! diffed between seeds.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use crate::world::TraceRecord;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Everything observed during the run
    pub events: Vec<TraceRecord>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            events: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: None,
        }
    }

    /// Appends trace records.
    pub fn extend_trace(&mut self, records: &[TraceRecord]) {
        if let Some(last) = records.last() {
            self.duration_sec = self.duration_sec.max(last.time_secs);
        }
        self.events.extend_from_slice(records);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, result: &ScenarioResult) {
        self.duration_sec = self.duration_sec.max(result.final_time_secs);
        self.passed = result.passed;
        self.failure_reason = result.failure_reason.clone();
        self.metrics = Some(result.metrics.clone());
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[tokio::test]
    async fn test_export_contains_trace_and_outcome() {
        let (result, trace) = ScenarioRunner::new(5)
            .run_traced(ScenarioId::SteadyRotation)
            .await;

        let mut export = SimExport::new(ScenarioId::SteadyRotation.name(), 5);
        export.extend_trace(&trace);
        export.finalize(&result);

        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["scenario"], "steady_rotation");
        assert_eq!(value["passed"], true);
        assert_eq!(value["duration_sec"], 60.0);
        assert!(value.get("failure_reason").is_none());

        let events = value["events"].as_array().unwrap();
        assert_eq!(events.len(), trace.len());
        assert!(events
            .iter()
            .any(|e| e["type"] == "presented" && e["rotation"] == true));
        assert!(events.iter().any(|e| e["type"] == "marker" && e["marker"] == "Three"));
    }

    #[test]
    fn test_write_to_file() {
        let export = SimExport::new("pause_resume", 9);
        let path = std::env::temp_dir().join(format!("spotlight-export-{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["seed"], 9);
    }
}
