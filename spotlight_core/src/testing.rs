//! Test doubles shared by the engine's unit tests.

use async_trait::async_trait;
use spotlight_env::{
    CandidateFilter, CandidateRecord, DeploymentId, Observation, ObservationId,
    ObservationResult, ObservationSource, Relation, SeriesId, SourceError,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

/// Builds an unflagged numeric observation.
pub fn observation(id: &str, series: &str, deployment: Option<&str>) -> Observation {
    Observation {
        id: ObservationId::from(id),
        series_id: SeriesId::from(series),
        deployment_id: deployment.map(DeploymentId::from),
        result: ObservationResult {
            value: serde_json::json!(21.5),
            unit: Some("degree-celsius".to_string()),
            flags: Vec::new(),
        },
        result_time: UNIX_EPOCH + Duration::from_secs(1_600_000_000),
        phenomenon_time: None,
        made_by_sensor: Some(format!("sensor-{series}")),
        observed_property: Some("air-temperature".to_string()),
        aggregation: Some("instant".to_string()),
        feature_of_interest: None,
        ancestor_platforms: Vec::new(),
        disciplines: Vec::new(),
        used_procedures: Vec::new(),
        location: None,
    }
}

/// In-memory source whose candidate responses can be scripted.
///
/// Without a script, candidate requests are answered from the catalog
/// using the request filter.
#[derive(Default)]
pub struct ScriptedSource {
    catalog: Vec<Observation>,
    scripted: Mutex<VecDeque<Result<Vec<CandidateRecord>, SourceError>>>,
    filters: Mutex<Vec<CandidateFilter>>,
    detail_failures: Mutex<usize>,
    latency: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(catalog: Vec<Observation>) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    /// Every request sleeps this long on the tokio clock first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_candidates(&self, response: Result<Vec<CandidateRecord>, SourceError>) {
        self.scripted.lock().unwrap().push_back(response);
    }

    pub fn fail_next_details(&self, count: usize) {
        *self.detail_failures.lock().unwrap() = count;
    }

    pub fn filters(&self) -> Vec<CandidateFilter> {
        self.filters.lock().unwrap().clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ObservationSource for ScriptedSource {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        self.delay().await;
        self.filters.lock().unwrap().push(filter.clone());
        if let Some(response) = self.scripted.lock().unwrap().pop_front() {
            return response;
        }
        Ok(self
            .catalog
            .iter()
            .filter(|o| filter.matches(o))
            .take(filter.limit)
            .map(Observation::candidate)
            .collect())
    }

    async fn fetch_observation(
        &self,
        id: &ObservationId,
        _expand: &[Relation],
    ) -> Result<Observation, SourceError> {
        self.delay().await;
        {
            let mut failures = self.detail_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::transport("detail request failed"));
            }
        }
        self.catalog
            .iter()
            .find(|o| &o.id == id)
            .cloned()
            .ok_or_else(|| SourceError::not_found(id))
    }
}
