use crate::detector::Suppression;
use tracing::info;

/// Counters and working values of the meter, owned by the control loop for the lifetime of
/// the process.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterState {
    rounds_per_kwh: u32,
    start_timestamp: i64,
    total_rounds: u64,
    day_rounds: u64,
    current_day: i32,
    last_rotation_timestamp: i64,
    current_power_watts: f64,
    pub(crate) suppression: Suppression,
}

/// What happened to the counters when a rotation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulation {
    pub day_rolled_over: bool,
}

impl MeterState {
    /// Zeroed state. `rounds_per_kwh` must be non-zero, configuration validates it.
    pub fn new(rounds_per_kwh: u32, start_timestamp: i64, current_day: i32) -> Self {
        Self {
            rounds_per_kwh,
            start_timestamp,
            total_rounds: 0,
            day_rounds: 0,
            current_day,
            last_rotation_timestamp: 0,
            current_power_watts: 0.0,
            suppression: Suppression::Idle,
        }
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn total_rounds(&self) -> u64 {
        self.total_rounds
    }

    pub fn day_rounds(&self) -> u64 {
        self.day_rounds
    }

    pub fn total_consumption_kwh(&self) -> f64 {
        self.total_rounds as f64 / self.rounds_per_kwh as f64
    }

    pub fn day_consumption_kwh(&self) -> f64 {
        self.day_rounds as f64 / self.rounds_per_kwh as f64
    }

    pub fn current_day(&self) -> i32 {
        self.current_day
    }

    /// Epoch time of the last accepted rotation, 0 before the first one.
    pub fn last_rotation_timestamp(&self) -> i64 {
        self.last_rotation_timestamp
    }

    pub fn current_power_watts(&self) -> f64 {
        self.current_power_watts
    }

    pub fn suppression(&self) -> Suppression {
        self.suppression
    }

    pub(crate) fn set_current_power(&mut self, watts: f64) {
        self.current_power_watts = watts;
    }

    /// Counts an accepted rotation at `timestamp`. Daily counters restart first when `today`
    /// differs from the stored day marker.
    pub fn record_rotation(&mut self, timestamp: i64, today: i32) -> Accumulation {
        let day_rolled_over = today != self.current_day;
        if day_rolled_over {
            info!(
                previous_day = self.current_day,
                new_day = today,
                day_rounds = self.day_rounds,
                "day rollover, resetting daily counters"
            );
            self.day_rounds = 0;
            self.current_day = today;
        }

        self.total_rounds += 1;
        self.day_rounds += 1;
        self.last_rotation_timestamp = timestamp;

        Accumulation { day_rolled_over }
    }
}
