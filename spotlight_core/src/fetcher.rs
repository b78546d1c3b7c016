//! Pending-observation resolution.
//!
//! Resolving a pending observation is a two-step conversation with the
//! source: ask for a batch of unpopulated candidates (cheap), pick one with
//! the [`CandidateSelector`], then ask for that single observation with all
//! of its metadata expanded. Asking for dozens of populated observations at
//! once would put needless load on the backend.

use crate::config::{ExclusionStrategy, RotationConfig};
use crate::error::{Result, RotationError};
use crate::history::SharedHistory;
use crate::selector::CandidateSelector;
use rand::rngs::StdRng;
use spotlight_env::{
    CandidateFilter, CandidateRecord, DeploymentId, Observation, ObservationSource, Relation,
    SeriesId, ValueKind,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Facade over an [`ObservationSource`] producing one pending observation
/// per call.
pub struct ObservationFetcher<S: ObservationSource> {
    /// Data-access layer
    source: Arc<S>,

    /// Selection policy
    selector: CandidateSelector,

    /// Randomness for selection
    rng: Mutex<StdRng>,

    /// Most recent non-empty candidate batch
    cache: Mutex<Vec<CandidateRecord>>,

    /// Candidates requested per batch
    batch_size: usize,

    /// Exclusions sent with each request
    exclusion: ExclusionStrategy,

    /// Optional value-type restriction
    value_kind: Option<ValueKind>,

    /// Skip flagged observations
    exclude_flagged: bool,
}

impl<S: ObservationSource> ObservationFetcher<S> {
    /// Creates a fetcher.
    ///
    /// # Arguments
    /// * `source` - Data-access layer
    /// * `config` - Batch size and exclusion settings are taken from here
    /// * `rng` - Selection randomness (seeded in simulation)
    pub fn new(source: Arc<S>, config: &RotationConfig, rng: StdRng) -> Self {
        Self {
            source,
            selector: CandidateSelector::new(),
            rng: Mutex::new(rng),
            cache: Mutex::new(Vec::new()),
            batch_size: config.batch_size,
            exclusion: config.exclusion,
            value_kind: config.value_kind,
            exclude_flagged: config.exclude_flagged,
        }
    }

    /// Returns the underlying source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Number of candidates held in the fallback cache.
    pub fn cached_candidates(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Builds the request filter for the current exclusion context.
    pub fn candidate_filter(
        &self,
        recent_series: &BTreeSet<SeriesId>,
        last_deployment: Option<&DeploymentId>,
    ) -> CandidateFilter {
        CandidateFilter {
            exclude_series: if self.exclusion.series {
                recent_series.clone()
            } else {
                BTreeSet::new()
            },
            exclude_deployment: if self.exclusion.deployment {
                last_deployment.cloned()
            } else {
                None
            },
            value_kind: self.value_kind,
            exclude_flagged: self.exclude_flagged,
            limit: self.batch_size,
        }
    }

    /// Resolves the next pending observation.
    ///
    /// On success the observation's series is recorded in `history`. Any
    /// failure leaves `history` untouched.
    ///
    /// # Errors
    /// * `FetchFailed` - the batch or the detail request failed
    /// * `NoCandidatesAvailable` - the live batch and the cache are empty
    pub async fn resolve_pending(
        &self,
        history: &SharedHistory,
        last_deployment: Option<&DeploymentId>,
    ) -> Result<Observation> {
        let recent: BTreeSet<SeriesId> = history.snapshot().into_iter().collect();
        let filter = self.candidate_filter(&recent, last_deployment);

        debug!("Getting unpopulated observations (limit {})", filter.limit);
        let batch = self.source.fetch_candidates(&filter).await.map_err(|e| {
            warn!("Candidate request failed: {}", e);
            RotationError::from(e)
        })?;
        debug!("Got {} observations", batch.len());

        let candidates = {
            let mut cache = lock(&self.cache);
            if batch.is_empty() {
                debug!("Empty batch, falling back to {} cached candidates", cache.len());
                cache.clone()
            } else {
                *cache = batch.clone();
                batch
            }
        };
        if candidates.is_empty() {
            return Err(RotationError::NoCandidatesAvailable);
        }

        let chosen = {
            let mut rng = lock(&self.rng);
            self.selector
                .select(&candidates, &recent, last_deployment, &mut *rng)?
                .clone()
        };

        debug!("Getting populated observation {}", chosen.id);
        let observation = self
            .source
            .fetch_observation(&chosen.id, &Relation::all())
            .await
            .map_err(|e| {
                warn!("Detail request for {} failed: {}", chosen.id, e);
                RotationError::from(e)
            })?;

        history.record(observation.series_id.clone());
        Ok(observation)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
