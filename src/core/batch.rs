use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::caution::generate_caution_schedule;
use super::comparator::{TrialComparison, compare_strategies};
use super::error::SimulationError;
use super::types::{
    BatchResult, BatchSummary, SimulationParameters, Strategy, TrialRow, TrialTraces,
};

/// Shared flag checked between trials; set it from another thread to abandon a batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub fn run_batch(params: &SimulationParameters) -> Result<BatchResult, SimulationError> {
    run_batch_with_cancel(params, &CancelToken::new())
}

/// Runs `params.trials` independent trials, each with its own caution schedule.
///
/// Every trial draws from a generator seeded by `(params.seed, trial)`, so the
/// results do not depend on whether trials ran in parallel.
pub fn run_batch_with_cancel(
    params: &SimulationParameters,
    cancel: &CancelToken,
) -> Result<BatchResult, SimulationError> {
    params.validate()?;
    run_trials(params, cancel, |trial| compare_trial(params, trial))
}

/// Drives `compare` over every trial and folds the outcomes into a batch.
/// A trial whose comparison fails becomes a failed row; the rest still run.
fn run_trials<F>(
    params: &SimulationParameters,
    cancel: &CancelToken,
    compare: F,
) -> Result<BatchResult, SimulationError>
where
    F: Fn(u32) -> Result<TrialComparison, SimulationError> + Sync,
{
    info!(
        trials = params.trials,
        cautions = params.caution_count,
        seed = params.seed,
        parallel = params.parallel,
        "starting batch"
    );

    let run_one = |trial: u32| {
        if cancel.is_cancelled() {
            None
        } else {
            Some(trial_row(trial, compare(trial)))
        }
    };
    let finished = if params.parallel {
        (1..=params.trials)
            .into_par_iter()
            .map(run_one)
            .collect::<Vec<_>>()
    } else {
        let mut finished = Vec::new();
        for trial in 1..=params.trials {
            let Some(done) = run_one(trial) else {
                break;
            };
            finished.push(Some(done));
        }
        finished
    };

    let completed = finished.iter().flatten().count() as u32;
    if completed < params.trials {
        info!(completed, "batch cancelled");
        return Err(SimulationError::Cancelled { completed });
    }

    let mut rows = Vec::with_capacity(finished.len());
    let mut traces = BTreeMap::new();
    for (row, trace) in finished.into_iter().flatten() {
        if let Some(trace) = trace {
            traces.insert(row.trial(), trace);
        }
        rows.push(row);
    }
    let gaps = rows
        .iter()
        .filter_map(TrialRow::outcome)
        .map(|outcome| outcome.gap)
        .collect();
    let summary = summarize(params.trials, &rows);

    info!(
        full_wins = summary.full_wins,
        partial_wins = summary.partial_wins,
        ties = summary.ties,
        failed = summary.failed,
        average_gap = summary.average_gap,
        "batch finished"
    );

    Ok(BatchResult {
        rows,
        traces,
        gaps,
        summary,
    })
}

fn compare_trial(
    params: &SimulationParameters,
    trial: u32,
) -> Result<TrialComparison, SimulationError> {
    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(params.seed, trial));
    let schedule = generate_caution_schedule(
        &mut rng,
        params.caution_count,
        params.caution_first_lap,
        params.caution_last_lap,
        params.caution_min_minutes,
        params.caution_max_minutes,
    )?;
    compare_strategies(params, &schedule, trial)
}

fn trial_row(
    trial: u32,
    result: Result<TrialComparison, SimulationError>,
) -> (TrialRow, Option<TrialTraces>) {
    match result {
        Ok(comparison) => {
            let (outcome, traces) = comparison.into_parts();
            debug!(
                trial,
                full_laps = outcome.full_laps,
                partial_laps = outcome.partial_laps,
                winner = outcome.winner.label(),
                gap = outcome.gap,
                "trial finished"
            );
            (TrialRow::Completed(outcome), Some(traces))
        }
        Err(err) => {
            warn!(trial, error = %err, "trial failed");
            (
                TrialRow::Failed {
                    trial,
                    error: err.to_string(),
                },
                None,
            )
        }
    }
}

/// Win counts credit "(by time)" results to their strategy. Percentages are
/// taken over every requested trial; the average gap only over completed ones.
pub fn summarize(trials: u32, rows: &[TrialRow]) -> BatchSummary {
    let mut completed = 0_u32;
    let mut full_wins = 0_u32;
    let mut partial_wins = 0_u32;
    let mut ties = 0_u32;
    let mut gap_total = 0.0;

    for outcome in rows.iter().filter_map(TrialRow::outcome) {
        completed += 1;
        gap_total += outcome.gap;
        match outcome.winner.strategy() {
            Some(Strategy::Full) => full_wins += 1,
            Some(Strategy::Partial) => partial_wins += 1,
            None => ties += 1,
        }
    }

    let percent = |wins: u32| {
        if trials == 0 {
            0.0
        } else {
            f64::from(wins) / f64::from(trials) * 100.0
        }
    };

    BatchSummary {
        trials,
        completed,
        failed: rows.len() as u32 - completed,
        full_wins,
        partial_wins,
        ties,
        full_win_percent: percent(full_wins),
        partial_win_percent: percent(partial_wins),
        average_gap: if completed == 0 {
            0.0
        } else {
            gap_total / f64::from(completed)
        },
    }
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ (u64::from(trial) << 32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
