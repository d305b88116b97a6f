use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::index;
use serde::Serialize;

use super::error::ConfigurationError;
use super::types::MAX_RACE_LAPS;

/// Most Code 60 periods fall in this window regardless of the configured bounds.
pub const TYPICAL_CAUTION_MINUTES: (f64, f64) = (8.0, 13.0);
const TYPICAL_CAUTION_PROBABILITY: f64 = 0.8;
pub const MAX_CAUTION_PERIODS: u32 = 30;

/// Caution laps mapped to the length of the slow zone in whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CautionSchedule {
    periods: BTreeMap<u32, u32>,
}

impl CautionSchedule {
    pub fn from_periods(periods: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            periods: periods.into_iter().collect(),
        }
    }

    pub fn duration(&self, lap: u32) -> Option<u32> {
        self.periods.get(&lap).copied()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Periods in ascending lap order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.periods.iter().map(|(lap, secs)| (*lap, *secs))
    }
}

pub fn validate_caution_config(
    num_events: u32,
    lap_range_low: u32,
    lap_range_high: u32,
    duration_min_minutes: f64,
    duration_max_minutes: f64,
) -> Result<(), ConfigurationError> {
    if num_events > MAX_CAUTION_PERIODS {
        return Err(ConfigurationError::TooManyCautionPeriods {
            requested: num_events,
            max: MAX_CAUTION_PERIODS,
        });
    }
    if lap_range_low == 0 || lap_range_high < lap_range_low || lap_range_high > MAX_RACE_LAPS {
        return Err(ConfigurationError::InvalidLapRange {
            low: lap_range_low,
            high: lap_range_high,
            max: MAX_RACE_LAPS,
        });
    }
    let available = lap_range_high - lap_range_low;
    if num_events > available {
        return Err(ConfigurationError::TooManyCautions {
            requested: num_events,
            available,
        });
    }
    if !duration_min_minutes.is_finite()
        || !duration_max_minutes.is_finite()
        || duration_min_minutes * 60.0 < 1.0
        || duration_max_minutes < duration_min_minutes
    {
        return Err(ConfigurationError::InvalidCautionDuration {
            min_minutes: duration_min_minutes,
            max_minutes: duration_max_minutes,
        });
    }
    Ok(())
}

pub fn generate_caution_schedule<R: Rng + ?Sized>(
    rng: &mut R,
    num_events: u32,
    lap_range_low: u32,
    lap_range_high: u32,
    duration_min_minutes: f64,
    duration_max_minutes: f64,
) -> Result<CautionSchedule, ConfigurationError> {
    validate_caution_config(
        num_events,
        lap_range_low,
        lap_range_high,
        duration_min_minutes,
        duration_max_minutes,
    )?;

    let available = (lap_range_high - lap_range_low) as usize;
    let mut laps = index::sample(rng, available, num_events as usize)
        .into_vec()
        .into_iter()
        .map(|offset| lap_range_low + offset as u32)
        .collect::<Vec<_>>();
    laps.sort_unstable();

    let periods = laps
        .into_iter()
        .map(|lap| {
            let secs = draw_duration_secs(rng, duration_min_minutes, duration_max_minutes);
            (lap, secs)
        })
        .collect();

    Ok(CautionSchedule { periods })
}

fn draw_duration_secs<R: Rng + ?Sized>(rng: &mut R, min_minutes: f64, max_minutes: f64) -> u32 {
    let minutes = if rng.random::<f64>() < TYPICAL_CAUTION_PROBABILITY {
        let (low, high) = TYPICAL_CAUTION_MINUTES;
        rng.random_range(low..high)
    } else {
        rng.random_range(min_minutes..=max_minutes)
    };
    (minutes * 60.0) as u32
}
