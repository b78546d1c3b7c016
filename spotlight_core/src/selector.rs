//! Fresh-first candidate selection.
//!
//! A candidate is "fresh" when its series is not in the exclusion set. The
//! selector picks uniformly among fresh candidates and, when there are none
//! (small series universe, long-running session), uniformly among all of
//! them so the rotation never starves.

use crate::error::{Result, RotationError};
use rand::seq::SliceRandom;
use rand::Rng;
use spotlight_env::{CandidateRecord, DeploymentId, SeriesId};
use std::collections::BTreeSet;
use tracing::debug;

/// Stateless selection policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateSelector;

impl CandidateSelector {
    pub fn new() -> Self {
        Self
    }

    /// Picks one candidate.
    ///
    /// # Arguments
    /// * `candidates` - The batch to choose from (must be non-empty)
    /// * `excluded_series` - Series shown recently
    /// * `excluded_deployment` - Deployment the source was asked to exclude.
    ///   Deployment filtering belongs to the request; here it is only
    ///   reported if the batch still contains it.
    /// * `rng` - Randomness source
    ///
    /// # Errors
    /// `EmptyCandidateSet` if `candidates` is empty.
    pub fn select<'a, R: Rng + ?Sized>(
        &self,
        candidates: &'a [CandidateRecord],
        excluded_series: &BTreeSet<SeriesId>,
        excluded_deployment: Option<&DeploymentId>,
        rng: &mut R,
    ) -> Result<&'a CandidateRecord> {
        if candidates.is_empty() {
            return Err(RotationError::EmptyCandidateSet);
        }

        if let Some(deployment) = excluded_deployment {
            let leaked = candidates
                .iter()
                .filter(|c| c.deployment_id.as_ref() == Some(deployment))
                .count();
            if leaked > 0 {
                debug!("{} candidates from excluded deployment {} left in batch", leaked, deployment);
            }
        }

        let fresh: Vec<&CandidateRecord> = candidates
            .iter()
            .filter(|c| !excluded_series.contains(&c.series_id))
            .collect();

        let selected = match fresh.choose(rng) {
            Some(candidate) => {
                debug!("{} fresh series to pick from", fresh.len());
                *candidate
            }
            None => {
                debug!("Resorting to an already used series");
                candidates.choose(rng).ok_or(RotationError::EmptyCandidateSet)?
            }
        };

        debug!("Selected observation {} (series: {})", selected.id, selected.series_id);
        Ok(selected)
    }
}
