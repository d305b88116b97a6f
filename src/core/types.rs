use std::collections::BTreeMap;

use serde::Serialize;

use super::caution::validate_caution_config;
use super::error::ConfigurationError;

pub const RACE_TIME_CUTOFF_SECS: f64 = 43_200.0;
pub const MAX_TRIALS: u32 = 1_000;
/// Longest race, in green laps, a single run may simulate.
pub const MAX_RACE_LAPS: u32 = 10_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Full,
    Partial,
}

impl Strategy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

/// How much fuel a low-fuel stop may add beyond the strategy ceiling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefuelBound {
    /// Never add more than the green-lap fuel needed for the laps left before the cutoff.
    LapsRemaining,
    /// Always fill to the strategy ceiling.
    Ceiling,
}

/// What has to fit inside a caution period for an opportunistic stop to be taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CautionBudget {
    /// Travel from mid-lap to pit entry at Code 60 speed plus the stop itself.
    EntryAndPit,
    /// The stop alone.
    PitOnly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PitPolicy {
    pub refuel_bound: RefuelBound,
    pub caution_budget: CautionBudget,
}

impl PitPolicy {
    pub const POSITION_AWARE: Self = Self {
        refuel_bound: RefuelBound::LapsRemaining,
        caution_budget: CautionBudget::EntryAndPit,
    };
    pub const FIXED_CEILING: Self = Self {
        refuel_bound: RefuelBound::Ceiling,
        caution_budget: CautionBudget::EntryAndPit,
    };
    pub const CORRECTED_BUDGET: Self = Self {
        refuel_bound: RefuelBound::LapsRemaining,
        caution_budget: CautionBudget::PitOnly,
    };
}

impl Default for PitPolicy {
    fn default() -> Self {
        Self::POSITION_AWARE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParameters {
    pub max_fuel: f64,
    pub fuel_usage_green: f64,
    pub fuel_usage_caution: f64,
    pub pit_speed_kph: f64,
    pub avg_lap_time: f64,
    pub circuit_length_km: f64,
    pub pitlane_length_km: f64,
    pub refuel_rate: f64,
    pub pit_overhead: f64,
    pub partial_refuel_ceiling: f64,
    pub caution_count: u32,
    pub caution_min_minutes: f64,
    pub caution_max_minutes: f64,
    pub caution_first_lap: u32,
    pub caution_last_lap: u32,
    pub race_time_cutoff: f64,
    pub trials: u32,
    pub seed: u64,
    pub pit_policy: PitPolicy,
    pub parallel: bool,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            max_fuel: 110.0,
            fuel_usage_green: 3.2,
            fuel_usage_caution: 1.4,
            pit_speed_kph: 40.0,
            avg_lap_time: 145.0,
            circuit_length_km: 7.004,
            pitlane_length_km: 1.0,
            refuel_rate: 1.875,
            pit_overhead: 10.0,
            partial_refuel_ceiling: 90.0,
            caution_count: 14,
            caution_min_minutes: 5.0,
            caution_max_minutes: 20.0,
            caution_first_lap: 10,
            caution_last_lap: 270,
            race_time_cutoff: RACE_TIME_CUTOFF_SECS,
            trials: 100,
            seed: 42,
            pit_policy: PitPolicy::default(),
            parallel: false,
        }
    }
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("max_fuel", self.max_fuel),
            ("fuel_usage_green", self.fuel_usage_green),
            ("pit_speed_kph", self.pit_speed_kph),
            ("avg_lap_time", self.avg_lap_time),
            ("circuit_length_km", self.circuit_length_km),
            ("refuel_rate", self.refuel_rate),
            ("partial_refuel_ceiling", self.partial_refuel_ceiling),
            ("race_time_cutoff", self.race_time_cutoff),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::NonPositive { field, value });
            }
        }
        for (field, value) in [
            ("fuel_usage_caution", self.fuel_usage_caution),
            ("pitlane_length_km", self.pitlane_length_km),
            ("pit_overhead", self.pit_overhead),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::Negative { field, value });
            }
        }
        if self.partial_refuel_ceiling > self.max_fuel {
            return Err(ConfigurationError::CeilingAboveCapacity {
                ceiling: self.partial_refuel_ceiling,
                capacity: self.max_fuel,
            });
        }
        if self.trials == 0 {
            return Err(ConfigurationError::NoTrials);
        }
        if self.trials > MAX_TRIALS {
            return Err(ConfigurationError::TooManyTrials {
                requested: self.trials,
                max: MAX_TRIALS,
            });
        }
        let green_laps = (self.race_time_cutoff / self.avg_lap_time).ceil();
        if green_laps > f64::from(MAX_RACE_LAPS) {
            return Err(ConfigurationError::RaceTooLong {
                laps: green_laps,
                max: MAX_RACE_LAPS,
            });
        }
        validate_caution_config(
            self.caution_count,
            self.caution_first_lap,
            self.caution_last_lap,
            self.caution_min_minutes,
            self.caution_max_minutes,
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LapCondition {
    Green,
    Caution,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PitStop {
    pub liters: f64,
    pub duration: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapRecord {
    pub lap: u32,
    pub condition: LapCondition,
    pub fuel: f64,
    pub elapsed_at_start: f64,
    pub lap_time: f64,
    pub low_fuel_stop: Option<PitStop>,
    pub caution_stop: Option<PitStop>,
}

impl LapRecord {
    pub fn finish_time(&self) -> f64 {
        self.elapsed_at_start + self.lap_time
    }

    pub fn pitted(&self) -> bool {
        self.low_fuel_stop.is_some() || self.caution_stop.is_some()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SimulationWarning {
    NegativeFuel { lap: u32, fuel: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRunResult {
    pub strategy: Strategy,
    pub laps: u32,
    pub total_time: f64,
    pub trace: Vec<LapRecord>,
    pub lap_start_times: Vec<f64>,
    pub warnings: Vec<SimulationWarning>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Winner {
    #[serde(rename = "Full")]
    Full,
    #[serde(rename = "Partial")]
    Partial,
    #[serde(rename = "Full (by time)")]
    FullByTime,
    #[serde(rename = "Partial (by time)")]
    PartialByTime,
    #[serde(rename = "Tie")]
    Tie,
}

impl Winner {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Partial => "Partial",
            Self::FullByTime => "Full (by time)",
            Self::PartialByTime => "Partial (by time)",
            Self::Tie => "Tie",
        }
    }

    /// The strategy credited with the win, counting time-only decisions.
    pub const fn strategy(self) -> Option<Strategy> {
        match self {
            Self::Full | Self::FullByTime => Some(Strategy::Full),
            Self::Partial | Self::PartialByTime => Some(Strategy::Partial),
            Self::Tie => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialOutcome {
    pub trial: u32,
    pub full_laps: u32,
    pub partial_laps: u32,
    pub full_time: f64,
    pub partial_time: f64,
    pub winner: Winner,
    pub gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TrialRow {
    Completed(TrialOutcome),
    Failed { trial: u32, error: String },
}

impl TrialRow {
    pub fn trial(&self) -> u32 {
        match self {
            Self::Completed(outcome) => outcome.trial,
            Self::Failed { trial, .. } => *trial,
        }
    }

    pub fn outcome(&self) -> Option<&TrialOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialTraces {
    pub full: Vec<LapRecord>,
    pub partial: Vec<LapRecord>,
    pub full_lap_start_times: Vec<f64>,
    pub partial_lap_start_times: Vec<f64>,
}

impl TrialTraces {
    /// Seconds the partial car trails the full car at the start of each lap.
    pub fn gap_per_lap(&self) -> Vec<f64> {
        self.full_lap_start_times
            .iter()
            .zip(&self.partial_lap_start_times)
            .map(|(full, partial)| partial - full)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub trials: u32,
    pub completed: u32,
    pub failed: u32,
    pub full_wins: u32,
    pub partial_wins: u32,
    pub ties: u32,
    pub full_win_percent: f64,
    pub partial_win_percent: f64,
    pub average_gap: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub rows: Vec<TrialRow>,
    pub traces: BTreeMap<u32, TrialTraces>,
    pub gaps: Vec<f64>,
    pub summary: BatchSummary,
}
