//! Fault scenarios for DST.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// DST-001: Healthy source with jittered latency
    SteadyRotation,

    /// DST-002: Fewer series than the history holds
    SmallUniverse,

    /// DST-003: Failing pre-fetches during a running rotation
    FlakySource,

    /// DST-004: Source unreachable when play is pressed
    InitialOutage,

    /// DST-005: Pause and play while a pre-fetch is in flight
    PauseResume,

    /// DST-006: Responses slower than the countdown window
    SlowSource,

    /// DST-007: Halting failure policy
    HaltPolicy,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyRotation,
            ScenarioId::SmallUniverse,
            ScenarioId::FlakySource,
            ScenarioId::InitialOutage,
            ScenarioId::PauseResume,
            ScenarioId::SlowSource,
            ScenarioId::HaltPolicy,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyRotation => "steady_rotation",
            ScenarioId::SmallUniverse => "small_universe",
            ScenarioId::FlakySource => "flaky_source",
            ScenarioId::InitialOutage => "initial_outage",
            ScenarioId::PauseResume => "pause_resume",
            ScenarioId::SlowSource => "slow_source",
            ScenarioId::HaltPolicy => "halt_policy",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyRotation => {
                "300ms +/- 100ms latency, verify cadence and series/deployment diversity"
            }
            ScenarioId::SmallUniverse => "3 series, verify rotation never stalls once all are seen",
            ScenarioId::FlakySource => {
                "One failed pre-fetch then 25% random failures, verify rotation survives"
            }
            ScenarioId::InitialOutage => {
                "Outage at play, verify halt without retry and recovery on next play"
            }
            ScenarioId::PauseResume => {
                "Pause/play during a 4s pre-fetch, verify the late response is discarded"
            }
            ScenarioId::SlowSource => {
                "9s resolutions against a 7s window, verify countdown keeps running"
            }
            ScenarioId::HaltPolicy => "halt_on_any_error policy, verify one failure stops rotation",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_rotation" | "steady" | "dst-001" => Ok(ScenarioId::SteadyRotation),
            "small_universe" | "small" | "dst-002" => Ok(ScenarioId::SmallUniverse),
            "flaky_source" | "flaky" | "dst-003" => Ok(ScenarioId::FlakySource),
            "initial_outage" | "outage" | "dst-004" => Ok(ScenarioId::InitialOutage),
            "pause_resume" | "pause" | "dst-005" => Ok(ScenarioId::PauseResume),
            "slow_source" | "slow" | "dst-006" => Ok(ScenarioId::SlowSource),
            "halt_policy" | "halt" | "dst-007" => Ok(ScenarioId::HaltPolicy),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("DST-005".parse::<ScenarioId>(), Ok(ScenarioId::PauseResume));
        assert_eq!("flaky".parse::<ScenarioId>(), Ok(ScenarioId::FlakySource));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
