use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{field} must be a finite number > 0 (got {value})")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must be a finite number >= 0 (got {value})")]
    Negative { field: &'static str, value: f64 },

    #[error("partial refuel ceiling {ceiling} L exceeds tank capacity {capacity} L")]
    CeilingAboveCapacity { ceiling: f64, capacity: f64 },

    #[error("trials must be > 0")]
    NoTrials,

    #[error("{requested} trials requested, at most {max} are allowed")]
    TooManyTrials { requested: u32, max: u32 },

    #[error("race of {laps} green laps exceeds the {max} lap limit")]
    RaceTooLong { laps: f64, max: u32 },

    #[error("caution lap range [{low}, {high}) must lie within laps 1..={max} and not be inverted")]
    InvalidLapRange { low: u32, high: u32, max: u32 },

    #[error("cannot place {requested} cautions without replacement in a range of {available} laps")]
    TooManyCautions { requested: u32, available: u32 },

    #[error("{requested} caution periods requested, at most {max} are allowed")]
    TooManyCautionPeriods { requested: u32, max: u32 },

    #[error("caution duration range {min_minutes}..={max_minutes} minutes is invalid")]
    InvalidCautionDuration { min_minutes: f64, max_minutes: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{strategy} run exceeded {limit} laps at {elapsed:.1}s without reaching the cutoff")]
    LapLimitExceeded {
        strategy: &'static str,
        limit: u32,
        elapsed: f64,
    },

    #[error("batch cancelled after {completed} trials")]
    Cancelled { completed: u32 },
}
