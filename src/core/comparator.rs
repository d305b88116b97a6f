use super::caution::CautionSchedule;
use super::engine::run_strategy;
use super::error::SimulationError;
use super::types::{
    SimulationParameters, Strategy, StrategyRunResult, TrialOutcome, TrialTraces, Winner,
};

#[derive(Debug, Clone)]
pub struct TrialComparison {
    pub outcome: TrialOutcome,
    pub full: StrategyRunResult,
    pub partial: StrategyRunResult,
}

impl TrialComparison {
    pub fn into_parts(self) -> (TrialOutcome, TrialTraces) {
        let traces = TrialTraces {
            full: self.full.trace,
            partial: self.partial.trace,
            full_lap_start_times: self.full.lap_start_times,
            partial_lap_start_times: self.partial.lap_start_times,
        };
        (self.outcome, traces)
    }
}

/// Races both strategies through the same caution schedule and scores the result.
pub fn compare_strategies(
    params: &SimulationParameters,
    schedule: &CautionSchedule,
    trial: u32,
) -> Result<TrialComparison, SimulationError> {
    let full = run_strategy(params, schedule, Strategy::Full)?;
    let partial = run_strategy(params, schedule, Strategy::Partial)?;

    let full_laps = completed_laps(&full, params.race_time_cutoff);
    let partial_laps = completed_laps(&partial, params.race_time_cutoff);
    let (winner, gap) = decide_winner(
        (full_laps, full.total_time),
        (partial_laps, partial.total_time),
        params.avg_lap_time,
    );

    Ok(TrialComparison {
        outcome: TrialOutcome {
            trial,
            full_laps,
            partial_laps,
            full_time: full.total_time,
            partial_time: partial.total_time,
            winner,
            gap,
        },
        full,
        partial,
    })
}

/// Laps finished inside the race time. Drops the lap that was still running at the cutoff.
pub fn completed_laps(run: &StrategyRunResult, race_time_cutoff: f64) -> u32 {
    run.trace
        .iter()
        .take_while(|record| record.finish_time() <= race_time_cutoff)
        .count() as u32
}

/// Picks the winner from `(laps, total_time)` of each strategy.
///
/// A lap advantage is converted to seconds assuming the cars are half a lap
/// apart on track; equal lap counts fall back to the raw time difference.
pub fn decide_winner(full: (u32, f64), partial: (u32, f64), avg_lap_time: f64) -> (Winner, f64) {
    let (full_laps, full_time) = full;
    let (partial_laps, partial_time) = partial;
    let lap_gap = |lead: u32| (f64::from(lead) - 1.0) * avg_lap_time + avg_lap_time * 0.5;

    if full_laps > partial_laps {
        (Winner::Full, lap_gap(full_laps - partial_laps))
    } else if partial_laps > full_laps {
        (Winner::Partial, lap_gap(partial_laps - full_laps))
    } else if full_time < partial_time {
        (Winner::FullByTime, (full_time - partial_time).abs())
    } else if partial_time < full_time {
        (Winner::PartialByTime, (partial_time - full_time).abs())
    } else {
        (Winner::Tie, 0.0)
    }
}
