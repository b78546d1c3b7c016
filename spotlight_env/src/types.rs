//! Common types for the Spotlight environment abstraction.
//!
//! These are the records exchanged between the rotation engine and an
//! [`ObservationSource`](crate::ObservationSource): lightweight candidates
//! used for selection, and fully-populated observations used for display.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Creates a deterministic identifier from a seed (for simulation).
            pub fn from_seed(seed: u64) -> Self {
                let mut bytes = [0u8; 16];
                bytes[0..8].copy_from_slice(&seed.to_le_bytes());
                bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
                Self(Uuid::from_bytes(bytes).to_string())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a single observation.
    ObservationId
);

string_id!(
    /// Identifier of a timeseries: the primary diversity key.
    SeriesId
);

string_id!(
    /// Identifier of a sensor deployment: the secondary diversity key.
    DeploymentId
);

/// Minimal identity of an observation, used for selection before the full
/// record is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Observation identifier
    pub id: ObservationId,

    /// Timeseries the observation belongs to
    pub series_id: SeriesId,

    /// Deployment that produced it, if known
    pub deployment_id: Option<DeploymentId>,
}

impl CandidateRecord {
    /// Creates a candidate record.
    pub fn new(
        id: impl Into<ObservationId>,
        series_id: impl Into<SeriesId>,
        deployment_id: Option<DeploymentId>,
    ) -> Self {
        Self {
            id: id.into(),
            series_id: series_id.into(),
            deployment_id,
        }
    }
}

/// Result payload of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationResult {
    /// The observed value (number, boolean, text or structured)
    pub value: serde_json::Value,

    /// Unit of measurement
    pub unit: Option<String>,

    /// Quality flags; an unflagged observation has none
    #[serde(default)]
    pub flags: Vec<String>,
}

/// The time window an observation describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhenomenonTime {
    pub has_beginning: SystemTime,
    pub has_end: SystemTime,
}

/// Where the observation was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Location identifier
    pub id: String,

    /// Position as (longitude, latitude)
    pub point: geo::Point<f64>,
}

/// A fully-populated observation record.
///
/// Held by exactly one rotation slot (pending or current) at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub series_id: SeriesId,
    pub deployment_id: Option<DeploymentId>,
    pub result: ObservationResult,
    pub result_time: SystemTime,
    pub phenomenon_time: Option<PhenomenonTime>,
    pub made_by_sensor: Option<String>,
    pub observed_property: Option<String>,
    pub aggregation: Option<String>,
    pub feature_of_interest: Option<String>,
    #[serde(default)]
    pub ancestor_platforms: Vec<String>,
    #[serde(default)]
    pub disciplines: Vec<String>,
    #[serde(default)]
    pub used_procedures: Vec<String>,
    pub location: Option<Location>,
}

impl Observation {
    /// Returns the lightweight candidate view of this observation.
    pub fn candidate(&self) -> CandidateRecord {
        CandidateRecord {
            id: self.id.clone(),
            series_id: self.series_id.clone(),
            deployment_id: self.deployment_id.clone(),
        }
    }

    /// Returns true if the observation carries any quality flag.
    pub fn is_flagged(&self) -> bool {
        !self.result.flags.is_empty()
    }
}

/// Metadata relations that can be expanded when fetching a full record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    HasDeployment,
    MadeBySensor,
    AncestorPlatforms,
    ObservedProperty,
    Unit,
    Aggregation,
    HasFeatureOfInterest,
    Disciplines,
    UsedProcedures,
}

impl Relation {
    /// Returns every expandable relation.
    pub fn all() -> Vec<Relation> {
        vec![
            Relation::HasDeployment,
            Relation::MadeBySensor,
            Relation::AncestorPlatforms,
            Relation::ObservedProperty,
            Relation::Unit,
            Relation::Aggregation,
            Relation::HasFeatureOfInterest,
            Relation::Disciplines,
            Relation::UsedProcedures,
        ]
    }

    /// Returns the relation's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Relation::HasDeployment => "hasDeployment",
            Relation::MadeBySensor => "madeBySensor",
            Relation::AncestorPlatforms => "ancestorPlatforms",
            Relation::ObservedProperty => "observedProperty",
            Relation::Unit => "unit",
            Relation::Aggregation => "aggregation",
            Relation::HasFeatureOfInterest => "hasFeatureOfInterest",
            Relation::Disciplines => "disciplines",
            Relation::UsedProcedures => "usedProcedures",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Broad type of an observation's result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    Boolean,
    Text,
    Structured,
}

impl ValueKind {
    /// Classifies a JSON value. `null` counts as structured.
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(_) => ValueKind::Number,
            serde_json::Value::Bool(_) => ValueKind::Boolean,
            serde_json::Value::String(_) => ValueKind::Text,
            _ => ValueKind::Structured,
        }
    }
}

/// Filter sent with a candidate batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFilter {
    /// Series that must not appear in the batch
    pub exclude_series: BTreeSet<SeriesId>,

    /// Deployment that must not appear in the batch
    pub exclude_deployment: Option<DeploymentId>,

    /// Only return observations with this kind of value
    pub value_kind: Option<ValueKind>,

    /// Only return observations without quality flags
    pub exclude_flagged: bool,

    /// Maximum batch size
    pub limit: usize,
}

impl CandidateFilter {
    /// Creates an unrestricted filter with the given limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            exclude_series: BTreeSet::new(),
            exclude_deployment: None,
            value_kind: None,
            exclude_flagged: false,
            limit,
        }
    }

    /// Returns true if the observation passes every exclusion rule.
    ///
    /// In-memory sources use this to apply exactly the semantics a
    /// server-side query would.
    pub fn matches(&self, observation: &Observation) -> bool {
        if self.exclude_series.contains(&observation.series_id) {
            return false;
        }
        if let (Some(excluded), Some(deployment)) =
            (&self.exclude_deployment, &observation.deployment_id)
        {
            if excluded == deployment {
                return false;
            }
        }
        if let Some(kind) = self.value_kind {
            if ValueKind::of(&observation.result.value) != kind {
                return false;
            }
        }
        !(self.exclude_flagged && observation.is_flagged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn observation(series: &str, deployment: Option<&str>, value: serde_json::Value) -> Observation {
        Observation {
            id: ObservationId::new(format!("obs-{series}")),
            series_id: SeriesId::new(series),
            deployment_id: deployment.map(DeploymentId::from),
            result: ObservationResult {
                value,
                unit: Some("degree-celsius".to_string()),
                flags: Vec::new(),
            },
            result_time: UNIX_EPOCH,
            phenomenon_time: None,
            made_by_sensor: None,
            observed_property: None,
            aggregation: None,
            feature_of_interest: None,
            ancestor_platforms: Vec::new(),
            disciplines: Vec::new(),
            used_procedures: Vec::new(),
            location: None,
        }
    }

    #[test]
    fn test_ids_from_seed_are_deterministic() {
        assert_eq!(SeriesId::from_seed(7), SeriesId::from_seed(7));
        assert_ne!(SeriesId::from_seed(7), SeriesId::from_seed(8));
    }

    #[test]
    fn test_filter_excludes_series_and_deployment() {
        let mut filter = CandidateFilter::with_limit(10);
        filter.exclude_series.insert(SeriesId::new("s1"));
        filter.exclude_deployment = Some(DeploymentId::new("d1"));

        assert!(!filter.matches(&observation("s1", Some("d2"), 1.into())));
        assert!(!filter.matches(&observation("s2", Some("d1"), 1.into())));
        assert!(filter.matches(&observation("s2", Some("d2"), 1.into())));
        // No deployment metadata: cannot be excluded by deployment
        assert!(filter.matches(&observation("s2", None, 1.into())));
    }

    #[test]
    fn test_filter_value_kind_and_flags() {
        let mut filter = CandidateFilter::with_limit(10);
        filter.value_kind = Some(ValueKind::Number);
        filter.exclude_flagged = true;

        let mut flagged = observation("s1", None, 3.5.into());
        assert!(filter.matches(&flagged));

        flagged.result.flags.push("persistence".to_string());
        assert!(!filter.matches(&flagged));

        assert!(!filter.matches(&observation("s2", None, true.into())));
    }

    #[test]
    fn test_value_kind_of() {
        assert_eq!(ValueKind::of(&serde_json::json!(1)), ValueKind::Number);
        assert_eq!(ValueKind::of(&serde_json::json!(false)), ValueKind::Boolean);
        assert_eq!(ValueKind::of(&serde_json::json!("on")), ValueKind::Text);
        assert_eq!(ValueKind::of(&serde_json::json!({"x": 1})), ValueKind::Structured);
    }

    #[test]
    fn test_relation_names() {
        assert_eq!(Relation::all().len(), 9);
        assert_eq!(Relation::HasFeatureOfInterest.to_string(), "hasFeatureOfInterest");
    }
}
