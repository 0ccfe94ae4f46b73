use crate::clock::Clock;
use std::time::Duration;

/// How long the detector ignores threshold crossings after a confirmed rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    /// Number of control-loop cycles. The real-world duration depends on the cycle delay.
    Ticks(u32),
    /// Wall-clock duration measured against the clock, independent of the cycle delay.
    WallClock(Duration),
}

/// Suppression state of the rotation detector, carried in the meter state between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Suppression {
    #[default]
    Idle,
    Suppressed { ticks_remaining: u32 },
    SuppressedUntil { expires_at: i64 },
}

impl Suppression {
    /// Remaining suppression cycles, 0 when idle or when suppression is time based.
    pub fn ticks_remaining(&self) -> u32 {
        match self {
            Suppression::Suppressed { ticks_remaining } => *ticks_remaining,
            _ => 0,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        !matches!(self, Suppression::Idle)
    }
}

/// Inclusive range of local hours that count as night. Wraps around midnight when
/// `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightHours {
    pub start: u32,
    pub end: u32,
}

impl NightHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start > self.end {
            hour >= self.start || hour <= self.end
        } else {
            hour >= self.start && hour <= self.end
        }
    }
}

impl Default for NightHours {
    fn default() -> Self {
        Self { start: 22, end: 7 }
    }
}

/// A confirmed rotation of the meter disc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationEvent {
    /// Epoch seconds at detection.
    pub timestamp: i64,
    /// Averaged sensor value that crossed the threshold.
    pub sample: f64,
    /// Suppression window that was armed by this rotation.
    pub window: Debounce,
}

/// Threshold crossing detector with a day/night dependent debounce window.
#[derive(Debug, Clone)]
pub struct RotationDetector {
    threshold: f64,
    day_window: Debounce,
    night_window: Debounce,
    night_hours: NightHours,
}

impl RotationDetector {
    pub fn new(
        threshold: f64,
        day_window: Debounce,
        night_window: Debounce,
        night_hours: NightHours,
    ) -> Self {
        Self {
            threshold,
            day_window,
            night_window,
            night_hours,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Picks the suppression window for a detection at the given local hour.
    pub fn window_for_hour(&self, hour: u32) -> Debounce {
        if self.night_hours.contains(hour) {
            self.night_window
        } else {
            self.day_window
        }
    }

    /// Runs one cycle of the state machine. Returns a rotation only when the detector was
    /// idle and `sample` reached the threshold.
    pub fn observe(
        &self,
        suppression: &mut Suppression,
        sample: f64,
        clock: &impl Clock,
    ) -> Option<RotationEvent> {
        if let Suppression::SuppressedUntil { expires_at } = *suppression {
            if clock.epoch_seconds() >= expires_at {
                *suppression = Suppression::Idle;
            }
        }

        match *suppression {
            Suppression::Idle => {
                if sample < self.threshold {
                    return None;
                }
                let timestamp = clock.epoch_seconds();
                let window = self.window_for_hour(clock.local_hour());
                *suppression = arm(window, timestamp);
                Some(RotationEvent {
                    timestamp,
                    sample,
                    window,
                })
            }
            Suppression::Suppressed { ticks_remaining } => {
                *suppression = if ticks_remaining > 1 {
                    Suppression::Suppressed {
                        ticks_remaining: ticks_remaining - 1,
                    }
                } else {
                    Suppression::Idle
                };
                None
            }
            Suppression::SuppressedUntil { .. } => None,
        }
    }
}

fn arm(window: Debounce, now: i64) -> Suppression {
    match window {
        Debounce::Ticks(0) => Suppression::Idle,
        Debounce::Ticks(ticks_remaining) => Suppression::Suppressed { ticks_remaining },
        Debounce::WallClock(duration) if duration.is_zero() => Suppression::Idle,
        Debounce::WallClock(duration) => Suppression::SuppressedUntil {
            expires_at: now.saturating_add(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)),
        },
    }
}
