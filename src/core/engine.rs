use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::caution::CautionSchedule;
use super::error::SimulationError;
use super::types::{
    CautionBudget, LapCondition, LapRecord, PitStop, RefuelBound, SimulationParameters,
    SimulationWarning, Strategy, StrategyRunResult,
};

/// Speed held under Code 60 while heading for pit entry.
const CODE60_SPEED_KPH: f64 = 60.0;
/// Part of the pit-lane transit already covered by the decel and accel zones.
const PIT_ZONE_ALLOWANCE_SECS: f64 = 9.0;
const CAUTION_STOP_MIN_SPACE: f64 = 15.0;
const CAUTION_STOP_MIN_BURNED: f64 = 15.0;
const CAUTION_STOP_MAX_LITERS: f64 = 28.0;
/// Far enough back that the first caution is never blocked by the burned-fuel rule.
const INITIAL_REFUEL_LAP: i64 = -10;

#[derive(Debug)]
struct CarState {
    fuel: f64,
    elapsed: f64,
    lap: u32,
    last_refuel_lap: i64,
    caution_laps_used: BTreeSet<u32>,
}

impl CarState {
    fn new(max_fuel: f64) -> Self {
        Self {
            fuel: max_fuel,
            elapsed: 0.0,
            lap: 0,
            last_refuel_lap: INITIAL_REFUEL_LAP,
            caution_laps_used: BTreeSet::new(),
        }
    }
}

/// Drives one car lap by lap until the race clock passes the cutoff.
///
/// The cutoff is checked before a lap starts, so the lap in progress when the
/// clock runs out is still counted. [`super::compare_strategies`] trims it.
pub fn run_strategy(
    params: &SimulationParameters,
    schedule: &CautionSchedule,
    strategy: Strategy,
) -> Result<StrategyRunResult, SimulationError> {
    let limit = lap_limit(params, schedule);
    let mut car = CarState::new(params.max_fuel);
    let mut trace = Vec::new();
    let mut lap_start_times = Vec::new();
    let mut warnings = Vec::new();

    while car.elapsed < params.race_time_cutoff {
        if car.lap >= limit {
            return Err(SimulationError::LapLimitExceeded {
                strategy: strategy.label(),
                limit,
                elapsed: car.elapsed,
            });
        }

        car.lap += 1;
        let caution_secs = schedule.duration(car.lap);
        let (condition, lap_time, burn) = match caution_secs {
            Some(secs) => (
                LapCondition::Caution,
                f64::from(secs),
                params.fuel_usage_caution,
            ),
            None => (
                LapCondition::Green,
                params.avg_lap_time,
                params.fuel_usage_green,
            ),
        };

        car.fuel -= burn;
        if car.fuel < 0.0 {
            warn!(
                strategy = strategy.label(),
                lap = car.lap,
                fuel = car.fuel,
                "tank ran dry during lap"
            );
            warnings.push(SimulationWarning::NegativeFuel {
                lap: car.lap,
                fuel: car.fuel,
            });
        }

        let mut low_fuel_stop = None;
        if car.fuel < params.fuel_usage_green {
            let liters = low_fuel_refuel_amount(params, strategy, car.elapsed);
            let duration = pit_stop_secs(params, liters);
            car.elapsed += duration;
            car.fuel += liters;
            car.last_refuel_lap = i64::from(car.lap);
            low_fuel_stop = Some(PitStop { liters, duration });
        }

        let mut caution_stop = None;
        if let Some(window) = caution_secs {
            if !car.caution_laps_used.contains(&car.lap) {
                if let Some(liters) = caution_refuel_candidate(params, strategy, &car) {
                    let duration = pit_stop_secs(params, liters);
                    if caution_budget_secs(params, duration) < f64::from(window) {
                        car.fuel += liters;
                        car.elapsed += duration;
                        car.caution_laps_used.insert(car.lap);
                        caution_stop = Some(PitStop { liters, duration });
                    }
                }
            }
        }

        trace.push(LapRecord {
            lap: car.lap,
            condition,
            fuel: car.fuel,
            elapsed_at_start: car.elapsed,
            lap_time,
            low_fuel_stop,
            caution_stop,
        });
        lap_start_times.push(car.elapsed);
        car.elapsed += lap_time;
    }

    debug!(
        strategy = strategy.label(),
        laps = car.lap,
        total_time = car.elapsed,
        stops = trace.iter().filter(|r| r.pitted()).count(),
        "strategy run finished"
    );

    Ok(StrategyRunResult {
        strategy,
        laps: car.lap,
        total_time: car.elapsed,
        trace,
        lap_start_times,
        warnings,
    })
}

/// Upper bound on laps: every green lap takes `avg_lap_time` and each caution
/// lap happens at most once.
fn lap_limit(params: &SimulationParameters, schedule: &CautionSchedule) -> u32 {
    let green_laps = (params.race_time_cutoff / params.avg_lap_time).ceil() as u32;
    green_laps
        .saturating_add(schedule.len() as u32)
        .saturating_add(1)
}

fn strategy_ceiling(params: &SimulationParameters, strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Full => params.max_fuel,
        Strategy::Partial => params.partial_refuel_ceiling,
    }
}

fn low_fuel_refuel_amount(params: &SimulationParameters, strategy: Strategy, elapsed: f64) -> f64 {
    let ceiling = strategy_ceiling(params, strategy);
    match params.pit_policy.refuel_bound {
        RefuelBound::Ceiling => ceiling,
        RefuelBound::LapsRemaining => {
            let laps_left = ((params.race_time_cutoff - elapsed) / params.avg_lap_time).floor();
            ceiling.min(laps_left * params.fuel_usage_green)
        }
    }
}

fn caution_refuel_candidate(
    params: &SimulationParameters,
    strategy: Strategy,
    car: &CarState,
) -> Option<f64> {
    let space = params.max_fuel - car.fuel;
    if space < CAUTION_STOP_MIN_SPACE {
        return None;
    }
    if strategy == Strategy::Full {
        let burned = (i64::from(car.lap) - car.last_refuel_lap) as f64 * params.fuel_usage_green;
        if burned < CAUTION_STOP_MIN_BURNED {
            return None;
        }
    }
    Some(space.min(CAUTION_STOP_MAX_LITERS))
}

fn pit_transit_secs(params: &SimulationParameters) -> f64 {
    (params.pitlane_length_km / params.pit_speed_kph) * 3600.0 - PIT_ZONE_ALLOWANCE_SECS
}

fn pit_stop_secs(params: &SimulationParameters, liters: f64) -> f64 {
    let refuel = liters * params.refuel_rate + params.pit_overhead;
    refuel + pit_transit_secs(params)
}

/// Time from the middle of the lap to pit entry at Code 60 speed.
fn time_to_pit_entry_secs(params: &SimulationParameters) -> f64 {
    let km_into_lap = 0.5 * params.circuit_length_km;
    (params.circuit_length_km - km_into_lap) / CODE60_SPEED_KPH * 3600.0
}

fn caution_budget_secs(params: &SimulationParameters, stop_secs: f64) -> f64 {
    match params.pit_policy.caution_budget {
        CautionBudget::EntryAndPit => time_to_pit_entry_secs(params) + stop_secs,
        CautionBudget::PitOnly => stop_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::caution::generate_caution_schedule;
    use crate::core::types::PitPolicy;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_params() -> SimulationParameters {
        SimulationParameters {
            caution_count: 0,
            trials: 1,
            ..SimulationParameters::default()
        }
    }

    fn stop_laps(run: &StrategyRunResult) -> Vec<u32> {
        run.trace
            .iter()
            .filter(|r| r.pitted())
            .map(|r| r.lap)
            .collect()
    }

    #[test]
    fn pit_time_components_match_track_geometry() {
        let params = sample_params();
        assert_approx(pit_transit_secs(&params), 81.0);
        assert_approx(pit_stop_secs(&params, 28.0), 143.5);
        assert_approx(time_to_pit_entry_secs(&params), 210.12);
    }

    #[test]
    fn green_race_pits_only_for_low_fuel() {
        for policy in [PitPolicy::POSITION_AWARE, PitPolicy::FIXED_CEILING] {
            let params = SimulationParameters {
                pit_policy: policy,
                ..sample_params()
            };
            let schedule = CautionSchedule::default();
            let full = run_strategy(&params, &schedule, Strategy::Full).expect("run");
            let partial = run_strategy(&params, &schedule, Strategy::Partial).expect("run");

            assert!(full.trace.iter().all(|r| r.caution_stop.is_none()));
            assert!(partial.trace.iter().all(|r| r.caution_stop.is_none()));
            assert_eq!(stop_laps(&full).len(), 8);
            assert_eq!(stop_laps(&partial).len(), 9);
            assert!(full.warnings.is_empty());
            assert!(partial.warnings.is_empty());
        }
    }

    #[test]
    fn first_low_fuel_stop_uses_strategy_ceiling() {
        let params = sample_params();
        let schedule = CautionSchedule::default();

        let full = run_strategy(&params, &schedule, Strategy::Full).expect("run");
        let first = full.trace.iter().find(|r| r.pitted()).expect("full stops");
        assert_eq!(first.lap, 34);
        let stop = first.low_fuel_stop.expect("low fuel stop");
        assert_approx(stop.liters, 110.0);
        assert_approx(stop.duration, 297.25);
        assert_approx(first.elapsed_at_start, 33.0 * 145.0 + 297.25);

        let partial = run_strategy(&params, &schedule, Strategy::Partial).expect("run");
        let first = partial.trace.iter().find(|r| r.pitted()).expect("partial stops");
        assert_eq!(first.lap, 34);
        let stop = first.low_fuel_stop.expect("low fuel stop");
        assert_approx(stop.liters, 90.0);
        assert_approx(stop.duration, 259.75);
    }

    #[test]
    fn laps_remaining_bound_trims_the_final_refuel() {
        let schedule = CautionSchedule::default();
        let bounded = run_strategy(&sample_params(), &schedule, Strategy::Full).expect("run");
        let fixed = run_strategy(
            &SimulationParameters {
                pit_policy: PitPolicy::FIXED_CEILING,
                ..sample_params()
            },
            &schedule,
            Strategy::Full,
        )
        .expect("run");

        let last_bounded = bounded
            .trace
            .iter()
            .rev()
            .find_map(|r| r.low_fuel_stop)
            .expect("stop");
        let last_fixed = fixed
            .trace
            .iter()
            .rev()
            .find_map(|r| r.low_fuel_stop)
            .expect("stop");
        assert!(last_bounded.liters < 110.0);
        assert_approx(last_fixed.liters, 110.0);
        assert!(bounded.laps > fixed.laps);
    }

    #[test]
    fn long_early_caution_triggers_one_caution_stop_for_both_strategies() {
        let params = sample_params();
        let schedule = CautionSchedule::from_periods([(20, 900)]);

        for strategy in [Strategy::Full, Strategy::Partial] {
            let run = run_strategy(&params, &schedule, strategy).expect("run");
            let caution_stops = run
                .trace
                .iter()
                .filter(|r| r.caution_stop.is_some())
                .collect::<Vec<_>>();
            assert_eq!(caution_stops.len(), 1);

            let lap = caution_stops[0];
            assert_eq!(lap.lap, 20);
            assert_eq!(lap.condition, LapCondition::Caution);
            assert_approx(lap.lap_time, 900.0);
            assert!(lap.low_fuel_stop.is_none());
            let stop = lap.caution_stop.expect("caution stop");
            assert_approx(stop.liters, 28.0);
            assert_approx(stop.duration, 143.5);
            assert_approx(lap.fuel, 110.0 - 19.0 * 3.2 - 1.4 + 28.0);
            assert_approx(lap.elapsed_at_start, 19.0 * 145.0 + 143.5);
        }
    }

    #[test]
    fn caution_budget_decides_borderline_windows() {
        // 300 s covers the 143.5 s stop but not the extra 210.12 s to reach pit entry.
        let schedule = CautionSchedule::from_periods([(20, 300)]);

        let entry_and_pit = run_strategy(&sample_params(), &schedule, Strategy::Partial).expect("run");
        assert!(entry_and_pit.trace[19].caution_stop.is_none());

        let pit_only = run_strategy(
            &SimulationParameters {
                pit_policy: PitPolicy::CORRECTED_BUDGET,
                ..sample_params()
            },
            &schedule,
            Strategy::Partial,
        )
        .expect("run");
        assert!(pit_only.trace[19].caution_stop.is_some());
    }

    #[test]
    fn partial_can_stack_a_caution_stop_on_a_low_fuel_stop() {
        let schedule = CautionSchedule::from_periods([(34, 900)]);
        let run = run_strategy(&sample_params(), &schedule, Strategy::Partial).expect("run");
        let lap = run.trace[33];
        assert_eq!(lap.lap, 34);
        assert_approx(lap.low_fuel_stop.expect("low fuel").liters, 90.0);
        assert_approx(lap.caution_stop.expect("caution").liters, 17.0);
        assert_approx(lap.fuel, 110.0);
    }

    #[test]
    fn full_strategy_needs_burned_fuel_before_a_caution_stop() {
        let params = sample_params();
        let mut car = CarState::new(params.max_fuel);
        car.fuel = 60.0;
        car.lap = 40;
        car.last_refuel_lap = 37;

        assert_eq!(caution_refuel_candidate(&params, Strategy::Full, &car), None);
        assert_eq!(
            caution_refuel_candidate(&params, Strategy::Partial, &car),
            Some(28.0)
        );

        car.last_refuel_lap = 35;
        assert_eq!(
            caution_refuel_candidate(&params, Strategy::Full, &car),
            Some(28.0)
        );

        car.fuel = 100.0;
        assert_eq!(caution_refuel_candidate(&params, Strategy::Partial, &car), None);
    }

    #[test]
    fn running_dry_is_reported_without_clamping() {
        let params = SimulationParameters {
            max_fuel: 10.0,
            fuel_usage_caution: 5.0,
            partial_refuel_ceiling: 9.0,
            ..sample_params()
        };
        let schedule = CautionSchedule::from_periods([(3, 60)]);

        for strategy in [Strategy::Full, Strategy::Partial] {
            let run = run_strategy(&params, &schedule, strategy).expect("run");
            assert_eq!(run.warnings.len(), 1);
            let SimulationWarning::NegativeFuel { lap, fuel } = run.warnings[0];
            assert_eq!(lap, 3);
            assert_approx(fuel, -1.4);
            assert!(run.trace[2].low_fuel_stop.is_some());
        }
    }

    #[test]
    fn final_lap_starts_before_cutoff_and_finishes_after_it() {
        let params = sample_params();
        let run = run_strategy(&params, &CautionSchedule::default(), Strategy::Full).expect("run");
        let last = run.trace.last().expect("non-empty trace");
        assert!(last.elapsed_at_start < params.race_time_cutoff);
        assert!(run.total_time >= params.race_time_cutoff);
        assert_approx(run.total_time, last.finish_time());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_trace_is_ordered_and_matches_lap_count(
            seed in any::<u64>(),
            cautions in 0u32..30,
            bound_by_laps in any::<bool>(),
            pit_only in any::<bool>(),
            full in any::<bool>()
        ) {
            let params = SimulationParameters {
                caution_count: cautions,
                pit_policy: PitPolicy {
                    refuel_bound: if bound_by_laps { RefuelBound::LapsRemaining } else { RefuelBound::Ceiling },
                    caution_budget: if pit_only { CautionBudget::PitOnly } else { CautionBudget::EntryAndPit },
                },
                ..sample_params()
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let schedule = generate_caution_schedule(&mut rng, cautions, 10, 270, 5.0, 20.0)
                .expect("valid schedule");
            let strategy = if full { Strategy::Full } else { Strategy::Partial };

            let run = run_strategy(&params, &schedule, strategy).expect("run terminates");

            prop_assert_eq!(run.trace.len(), run.laps as usize);
            prop_assert_eq!(run.lap_start_times.len(), run.laps as usize);
            prop_assert!(run.laps <= lap_limit(&params, &schedule));
            prop_assert!(run.total_time >= params.race_time_cutoff);
            let mut previous = 0.0;
            for (idx, record) in run.trace.iter().enumerate() {
                prop_assert_eq!(record.lap as usize, idx + 1);
                prop_assert!(record.elapsed_at_start >= previous);
                prop_assert_eq!(record.elapsed_at_start, run.lap_start_times[idx]);
                previous = record.elapsed_at_start;
            }
        }
    }
}
