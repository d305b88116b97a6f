mod batch;
mod caution;
mod comparator;
mod engine;
mod error;
mod types;

pub use batch::{CancelToken, run_batch, run_batch_with_cancel, summarize};
pub use caution::{
    CautionSchedule, TYPICAL_CAUTION_MINUTES, generate_caution_schedule, validate_caution_config,
};
pub use comparator::{TrialComparison, compare_strategies, completed_laps, decide_winner};
pub use engine::run_strategy;
pub use error::{ConfigurationError, SimulationError};
pub use types::{
    BatchResult, BatchSummary, CautionBudget, LapCondition, LapRecord, PitPolicy, PitStop,
    RACE_TIME_CUTOFF_SECS, RefuelBound, SimulationParameters, SimulationWarning, Strategy,
    StrategyRunResult, TrialOutcome, TrialRow, TrialTraces, Winner,
};
