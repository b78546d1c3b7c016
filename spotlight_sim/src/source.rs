//! Simulated observation source with fault injection.

use async_trait::async_trait;
use geo::Point;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use spotlight_env::{
    CandidateFilter, CandidateRecord, DeploymentId, Location, Observation, ObservationId,
    ObservationResult, ObservationSource, PhenomenonTime, Relation, SeriesId, SourceError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shape of a generated catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSpec {
    /// Number of distinct timeseries
    pub series: usize,

    /// Number of distinct deployments; series are spread round-robin
    pub deployments: usize,

    /// Observations per timeseries
    pub per_series: usize,

    /// Every n-th observation carries a quality flag (0 = never)
    pub flagged_every: usize,
}

impl Default for CatalogSpec {
    fn default() -> Self {
        Self {
            series: 40,
            deployments: 8,
            per_series: 5,
            flagged_every: 20,
        }
    }
}

impl CatalogSpec {
    /// Generates a deterministic catalog, newest observation first.
    ///
    /// Deployments are scattered around a common centre so that hop
    /// distances between presented observations are meaningful.
    pub fn generate(&self, seed: u64) -> Vec<Observation> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0xca7a_1065);
        let base = UNIX_EPOCH + Duration::from_secs(1704067200);
        let deployments = self.deployments.max(1);

        let sites: Vec<Point<f64>> = (0..deployments)
            .map(|_| Point::new(rng.gen_range(-1.75..-1.45), rng.gen_range(54.90..55.05)))
            .collect();

        let mut catalog = Vec::with_capacity(self.series * self.per_series);
        for s in 0..self.series {
            let series_id = SeriesId::new(format!("series-{s:03}"));
            let site = s % deployments;
            let deployment_id = DeploymentId::new(format!("deployment-{site:02}"));

            for n in 0..self.per_series {
                let index = s * self.per_series + n;
                let result_time = base + Duration::from_secs(rng.gen_range(0..86_400));
                let flags = if self.flagged_every > 0 && (index + 1) % self.flagged_every == 0 {
                    vec!["suspect".to_string()]
                } else {
                    Vec::new()
                };

                catalog.push(Observation {
                    id: ObservationId::from_seed(seed.wrapping_add(index as u64)),
                    series_id: series_id.clone(),
                    deployment_id: Some(deployment_id.clone()),
                    result: ObservationResult {
                        value: serde_json::json!(rng.gen_range(-5.0..30.0_f64)),
                        unit: Some("degree-celsius".to_string()),
                        flags,
                    },
                    result_time,
                    phenomenon_time: Some(PhenomenonTime {
                        has_beginning: result_time - Duration::from_secs(60),
                        has_end: result_time,
                    }),
                    made_by_sensor: None,
                    observed_property: None,
                    aggregation: None,
                    feature_of_interest: None,
                    ancestor_platforms: Vec::new(),
                    disciplines: Vec::new(),
                    used_procedures: Vec::new(),
                    location: Some(Location {
                        id: format!("location-{site:02}"),
                        point: sites[site],
                    }),
                });
            }
        }

        catalog.sort_by(|a, b| b.result_time.cmp(&a.result_time));
        catalog
    }
}

/// Fault injection state, shared between the source and its controller.
#[derive(Debug)]
struct FaultState {
    /// Requests left to fail before normal service resumes
    fail_next: usize,

    /// Every request fails while set
    outage: bool,

    /// Probability of a random failure per request
    failure_rate: f64,

    /// Mean round-trip latency
    latency_base: Duration,

    /// Standard deviation of the round-trip latency
    latency_jitter: Duration,

    /// Latency accrued since the last `take_accrued_latency`
    accrued: Duration,

    rng: ChaCha8Rng,

    candidate_calls: u64,
    detail_calls: u64,
    failures: u64,
}

/// Controller for fault injection and call accounting.
///
/// Cloning shares the underlying state, so a scenario can keep a
/// controller while the world owns the source.
#[derive(Debug, Clone)]
pub struct SourceController {
    state: Arc<Mutex<FaultState>>,
}

impl SourceController {
    fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(FaultState {
                fail_next: 0,
                outage: false,
                failure_rate: 0.0,
                latency_base: Duration::ZERO,
                latency_jitter: Duration::ZERO,
                accrued: Duration::ZERO,
                rng: ChaCha8Rng::seed_from_u64(seed.wrapping_mul(0x9e3779b97f4a7c15)),
                candidate_calls: 0,
                detail_calls: 0,
                failures: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` requests.
    pub fn fail_next(&self, count: usize) {
        self.state().fail_next = count;
    }

    /// Starts or ends a total outage.
    pub fn set_outage(&self, outage: bool) {
        self.state().outage = outage;
    }

    /// Sets the probability of a random request failure.
    pub fn set_failure_rate(&self, rate: f64) {
        self.state().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Sets per-request latency as a normal distribution.
    pub fn set_latency(&self, base: Duration, jitter: Duration) {
        let mut state = self.state();
        state.latency_base = base;
        state.latency_jitter = jitter;
    }

    /// Returns and resets the latency accrued by requests so far.
    pub fn take_accrued_latency(&self) -> Duration {
        std::mem::take(&mut self.state().accrued)
    }

    /// Number of candidate batch requests served or failed.
    pub fn candidate_calls(&self) -> u64 {
        self.state().candidate_calls
    }

    /// Number of single-observation requests served or failed.
    pub fn detail_calls(&self) -> u64 {
        self.state().detail_calls
    }

    /// Number of injected failures.
    pub fn failures(&self) -> u64 {
        self.state().failures
    }

    /// Accounts for one request: accrues latency and decides whether it fails.
    fn admit(&self) -> Result<(), SourceError> {
        let mut state = self.state();

        let latency = if state.latency_jitter.is_zero() {
            state.latency_base
        } else {
            let mean = state.latency_base.as_secs_f64();
            let std_dev = state.latency_jitter.as_secs_f64();
            match Normal::new(mean, std_dev) {
                Ok(normal) => Duration::from_secs_f64(normal.sample(&mut state.rng).max(0.0)),
                Err(_) => state.latency_base,
            }
        };
        state.accrued += latency;

        let fail = if state.outage {
            true
        } else if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            let rate = state.failure_rate;
            rate > 0.0 && state.rng.gen_bool(rate)
        };

        if fail {
            state.failures += 1;
            Err(SourceError::transport("simulated backend failure"))
        } else {
            Ok(())
        }
    }
}

/// In-memory observation source.
///
/// Applies `CandidateFilter` exactly as a server-side query would and
/// returns candidates newest first.
pub struct SimSource {
    catalog: Vec<Observation>,
    controller: SourceController,
}

impl SimSource {
    /// Creates a source over the given catalog.
    pub fn new(catalog: Vec<Observation>, seed: u64) -> Self {
        Self {
            catalog,
            controller: SourceController::new(seed),
        }
    }

    /// Returns the fault injection controller.
    pub fn controller(&self) -> &SourceController {
        &self.controller
    }

    /// Returns the backing catalog.
    pub fn catalog(&self) -> &[Observation] {
        &self.catalog
    }

    /// Looks up an observation by id.
    pub fn get(&self, id: &ObservationId) -> Option<&Observation> {
        self.catalog.iter().find(|o| &o.id == id)
    }
}

#[async_trait]
impl ObservationSource for SimSource {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        self.controller.state().candidate_calls += 1;
        self.controller.admit()?;

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
        self.controller.state().detail_calls += 1;
        self.controller.admit()?;

        self.get(id).cloned().ok_or_else(|| SourceError::not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn source(seed: u64) -> SimSource {
        SimSource::new(CatalogSpec::default().generate(seed), seed)
    }

    #[test]
    fn test_catalog_is_deterministic() {
        let a = CatalogSpec::default().generate(7);
        let b = CatalogSpec::default().generate(7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
    }

    #[test]
    fn test_catalog_newest_first() {
        let catalog = CatalogSpec::default().generate(3);
        assert!(catalog.windows(2).all(|w| w[0].result_time >= w[1].result_time));
    }

    #[test]
    fn test_catalog_flags_every_nth() {
        let shape = CatalogSpec {
            flagged_every: 10,
            ..CatalogSpec::default()
        };
        let catalog = shape.generate(1);
        assert_eq!(catalog.iter().filter(|o| o.is_flagged()).count(), 20);
    }

    #[tokio::test]
    async fn test_candidates_respect_filter() {
        let source = source(11);
        let mut filter = CandidateFilter::with_limit(15);
        filter.exclude_series = (0..30)
            .map(|s| SeriesId::new(format!("series-{s:03}")))
            .collect::<BTreeSet<_>>();
        filter.exclude_deployment = Some(DeploymentId::new("deployment-00"));
        filter.exclude_flagged = true;

        let batch = source.fetch_candidates(&filter).await.unwrap();
        assert!(!batch.is_empty());
        assert!(batch.len() <= 15);
        for candidate in &batch {
            assert!(!filter.exclude_series.contains(&candidate.series_id));
            assert_ne!(candidate.deployment_id, filter.exclude_deployment);
            assert!(!source.get(&candidate.id).unwrap().is_flagged());
        }
    }

    #[tokio::test]
    async fn test_fetch_observation_not_found() {
        let source = source(1);
        let err = source
            .fetch_observation(&ObservationId::new("missing"), &Relation::all())
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::not_found("missing"));
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let source = source(5);
        source.controller().fail_next(2);

        let filter = CandidateFilter::with_limit(5);
        assert!(source.fetch_candidates(&filter).await.is_err());
        assert!(source.fetch_candidates(&filter).await.is_err());
        assert!(source.fetch_candidates(&filter).await.is_ok());

        assert_eq!(source.controller().candidate_calls(), 3);
        assert_eq!(source.controller().failures(), 2);
    }

    #[tokio::test]
    async fn test_outage() {
        let source = source(5);
        source.controller().set_outage(true);
        assert!(source.fetch_candidates(&CandidateFilter::with_limit(5)).await.is_err());

        source.controller().set_outage(false);
        assert!(source.fetch_candidates(&CandidateFilter::with_limit(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_latency_accrues_per_request() {
        let source = source(9);
        source.controller().set_latency(Duration::from_millis(250), Duration::ZERO);

        let filter = CandidateFilter::with_limit(5);
        let batch = source.fetch_candidates(&filter).await.unwrap();
        source.fetch_observation(&batch[0].id, &[]).await.unwrap();

        assert_eq!(source.controller().take_accrued_latency(), Duration::from_millis(500));
        assert_eq!(source.controller().take_accrued_latency(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_jittered_latency_is_non_negative_and_seeded() {
        let a = source(9);
        let b = source(9);
        for s in [&a, &b] {
            s.controller().set_latency(Duration::from_millis(100), Duration::from_millis(80));
            for _ in 0..20 {
                let _ = s.fetch_candidates(&CandidateFilter::with_limit(1)).await;
            }
        }
        assert_eq!(
            a.controller().take_accrued_latency(),
            b.controller().take_accrued_latency()
        );
    }
}
