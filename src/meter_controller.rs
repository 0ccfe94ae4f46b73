use crate::clock::Clock;
use crate::config::MeterConfig;
use crate::detector::{RotationDetector, RotationEvent, Suppression};
use crate::indicator::{Indicator, NoIndicator};
use crate::power::{PowerEstimator, PowerReading};
use crate::sensor::{SensorPort, SensorSampler};
use crate::state::MeterState;
use crate::telemetry::{PublishOutcome, TelemetryPublisher, TelemetrySink};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// The status light goes out once fewer suppression cycles than this remain.
const INDICATOR_HOLD_TICKS: u32 = 10;

/// Running totals of what the control loop has done since startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeterStats {
    pub cycles: u64,
    pub rotations_detected: u64,
    pub rotations_accepted: u64,
    pub rejected_readings: u64,
    pub publishes: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    NoRotation,
    /// Rotation discarded by the plausibility filter.
    Rejected { watts: f64 },
    Accepted {
        day_rolled_over: bool,
        publish: PublishOutcome,
    },
}

/// What a single control-loop cycle observed and did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub raw: i32,
    pub sample: f64,
    pub outcome: CycleOutcome,
}

/// Owns the meter state and runs the sample, detect, estimate, accumulate, publish cycle.
pub struct MeterController<P, C, S> {
    sampler: SensorSampler<P>,
    clock: C,
    detector: RotationDetector,
    estimator: PowerEstimator,
    publisher: TelemetryPublisher<S>,
    indicator: Box<dyn Indicator>,
    indicator_lit: bool,
    state: MeterState,
    stats: MeterStats,
    cycle_delay: Duration,
}

impl<P, C, S> MeterController<P, C, S>
where
    P: SensorPort,
    C: Clock,
    S: TelemetrySink,
{
    /// `start_timestamp` is the first valid clock reading; the current day is seeded from
    /// the clock.
    pub fn new(
        config: &MeterConfig,
        port: P,
        clock: C,
        publisher: TelemetryPublisher<S>,
        start_timestamp: i64,
    ) -> Self {
        let state = MeterState::new(config.rounds_per_kwh, start_timestamp, clock.local_day());
        Self {
            sampler: SensorSampler::new(port, config.samples_per_cycle),
            clock,
            detector: RotationDetector::new(
                config.sensor_threshold,
                config.day_debounce,
                config.night_debounce,
                config.night_hours,
            ),
            estimator: PowerEstimator::new(
                config.watt_per_round_per_minute,
                config.implausible_ceiling_watts,
            ),
            publisher,
            indicator: Box::new(NoIndicator),
            indicator_lit: false,
            state,
            stats: MeterStats::default(),
            cycle_delay: config.cycle_delay,
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn state(&self) -> &MeterState {
        &self.state
    }

    pub fn stats(&self) -> MeterStats {
        self.stats
    }

    pub fn sink_down(&self) -> bool {
        self.publisher.sink_down()
    }

    pub fn indicator_lit(&self) -> bool {
        self.indicator_lit
    }

    /// Runs cycles forever, pausing the configured delay between them.
    pub async fn run(&mut self) {
        info!(cycle_delay = ?self.cycle_delay, "meter control loop started");
        loop {
            self.run_cycle().await;
            sleep(self.cycle_delay).await;
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;
        let sample = self.sampler.sample();

        let outcome = match self
            .detector
            .observe(&mut self.state.suppression, sample, &self.clock)
        {
            Some(event) => self.handle_rotation(event).await,
            None => CycleOutcome::NoRotation,
        };

        self.update_indicator();

        let report = CycleReport {
            raw: self.sampler.last_raw(),
            sample,
            outcome,
        };
        debug!(
            raw = report.raw,
            sample = report.sample,
            threshold = self.detector.threshold(),
            power = self.state.current_power_watts(),
            suppression = ?self.state.suppression(),
            "cycle"
        );
        report
    }

    async fn handle_rotation(&mut self, event: RotationEvent) -> CycleOutcome {
        self.stats.rotations_detected += 1;

        match self
            .estimator
            .estimate(event.timestamp, self.state.last_rotation_timestamp())
        {
            PowerReading::Rejected { watts } => {
                self.stats.rejected_readings += 1;
                metrics::counter!("meter_rejected_readings_total").increment(1);
                warn!(
                    watts,
                    timestamp = event.timestamp,
                    last_rotation = self.state.last_rotation_timestamp(),
                    rejected_total = self.stats.rejected_readings,
                    "implausible power reading, rotation discarded"
                );
                return CycleOutcome::Rejected { watts };
            }
            PowerReading::Accepted { watts } => self.state.set_current_power(watts),
            PowerReading::FirstRotation => {
                debug!("first rotation since startup, no power estimate yet");
            }
        }

        let accumulation = self
            .state
            .record_rotation(event.timestamp, self.clock.local_day());
        self.stats.rotations_accepted += 1;
        metrics::counter!("meter_rotations_total").increment(1);
        info!(
            timestamp = event.timestamp,
            window = ?event.window,
            total_rounds = self.state.total_rounds(),
            day_rounds = self.state.day_rounds(),
            power = self.state.current_power_watts(),
            "rotation counted"
        );

        let publish = self.publisher.publish(&self.state, event.sample).await;
        match publish {
            PublishOutcome::Delivered { .. } => self.stats.publishes += 1,
            PublishOutcome::Dropped => {
                self.stats.publish_failures += 1;
                metrics::counter!("meter_publish_failures_total").increment(1);
            }
        }
        self.set_indicator(true);

        CycleOutcome::Accepted {
            day_rolled_over: accumulation.day_rolled_over,
            publish,
        }
    }

    fn update_indicator(&mut self) {
        let hold = match self.state.suppression() {
            Suppression::Idle => false,
            Suppression::Suppressed { ticks_remaining } => ticks_remaining >= INDICATOR_HOLD_TICKS,
            Suppression::SuppressedUntil { .. } => true,
        };
        if self.indicator_lit && !hold {
            self.set_indicator(false);
        }
    }

    fn set_indicator(&mut self, lit: bool) {
        self.indicator.set(lit);
        self.indicator_lit = lit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detector::Debounce;
    use crate::telemetry::{PublisherSettings, RetryPolicy};
    use async_trait::async_trait;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LevelPort(Arc<AtomicI32>);

    impl SensorPort for LevelPort {
        fn read_analog(&mut self) -> i32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[derive(Clone, Default)]
    struct CountingSink {
        published: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl TelemetrySink for CountingSink {
        async fn connect(&mut self) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn publish(&mut self, _topic: &str, _payload: &[u8], _retain: bool) -> bool {
            *self.published.lock().unwrap() += 1;
            true
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLed(Arc<Mutex<Vec<bool>>>);

    impl Indicator for RecordingLed {
        fn set(&mut self, lit: bool) {
            self.0.lock().unwrap().push(lit);
        }
    }

    fn controller(
        level: &LevelPort,
        clock: &ManualClock,
        sink: &CountingSink,
    ) -> MeterController<LevelPort, ManualClock, CountingSink> {
        let config = MeterConfig {
            samples_per_cycle: NonZeroUsize::new(5).unwrap(),
            ..MeterConfig::default()
        };
        let publisher = TelemetryPublisher::new(
            sink.clone(),
            PublisherSettings {
                retry: RetryPolicy {
                    max_attempts: 1,
                    retry_delay: Duration::ZERO,
                },
                ..PublisherSettings::default()
            },
        );
        MeterController::new(&config, level.clone(), clock.clone(), publisher, 900)
    }

    #[tokio::test]
    async fn test_quiet_cycles_change_nothing() {
        let level = LevelPort::default();
        let clock = ManualClock::new(1000, 12, 14);
        let sink = CountingSink::default();
        let mut meter = controller(&level, &clock, &sink);

        level.0.store(12, Ordering::Relaxed);
        for _ in 0..10 {
            let report = meter.run_cycle().await;
            assert_eq!(report.outcome, CycleOutcome::NoRotation);
            assert_eq!(report.sample, 12.0);
            assert_eq!(report.raw, 12);
        }
        assert_eq!(meter.state().total_rounds(), 0);
        assert_eq!(meter.stats().cycles, 10);
        assert_eq!(*sink.published.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_reading_is_counted_but_not_published() {
        let level = LevelPort::default();
        let clock = ManualClock::new(1000, 12, 14);
        let sink = CountingSink::default();
        let mut meter = controller(&level, &clock, &sink);
        level.0.store(45, Ordering::Relaxed);

        meter.run_cycle().await;
        for _ in 0..20 {
            meter.run_cycle().await;
        }
        clock.set_epoch(1004);
        let report = meter.run_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Rejected { watts: 12000.0 });
        assert_eq!(meter.state().total_rounds(), 1);
        assert_eq!(meter.state().last_rotation_timestamp(), 1000);
        assert_eq!(meter.stats().rejected_readings, 1);
        assert_eq!(meter.stats().rotations_detected, 2);
        assert_eq!(*sink.published.lock().unwrap(), 1);
        // The discarded rotation still arms the debounce window
        assert_eq!(
            meter.state().suppression(),
            Suppression::Suppressed {
                ticks_remaining: 20
            }
        );
    }

    #[tokio::test]
    async fn test_indicator_follows_suppression_window() {
        let level = LevelPort::default();
        let clock = ManualClock::new(1000, 12, 14);
        let sink = CountingSink::default();
        let led = RecordingLed::default();
        let mut meter =
            controller(&level, &clock, &sink).with_indicator(Box::new(led.clone()));

        level.0.store(45, Ordering::Relaxed);
        meter.run_cycle().await;
        assert!(meter.indicator_lit());

        // 20 -> 10 remaining keeps the light on
        for _ in 0..10 {
            meter.run_cycle().await;
            assert!(meter.indicator_lit());
        }
        meter.run_cycle().await;
        assert!(!meter.indicator_lit());
        assert_eq!(*led.0.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_wall_clock_debounce_ignores_cycle_count() {
        let level = LevelPort::default();
        let clock = ManualClock::new(1000, 12, 14);
        let sink = CountingSink::default();
        let config = MeterConfig {
            day_debounce: Debounce::WallClock(Duration::from_secs(10)),
            samples_per_cycle: NonZeroUsize::new(1).unwrap(),
            ..MeterConfig::default()
        };
        let publisher = TelemetryPublisher::new(sink.clone(), PublisherSettings::default());
        let mut meter = MeterController::new(&config, level.clone(), clock.clone(), publisher, 900);

        level.0.store(45, Ordering::Relaxed);
        meter.run_cycle().await;
        for _ in 0..200 {
            assert_eq!(meter.run_cycle().await.outcome, CycleOutcome::NoRotation);
        }

        clock.set_epoch(1045);
        assert!(matches!(
            meter.run_cycle().await.outcome,
            CycleOutcome::Accepted { .. }
        ));
        assert_eq!(meter.state().total_rounds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_cycle_delay_after_each_cycle() {
        let level = LevelPort::default();
        let clock = ManualClock::new(1000, 12, 14);
        let sink = CountingSink::default();
        let mut meter = controller(&level, &clock, &sink);

        // Cycles start at 0, 500 and 1000 ms
        let stopped = tokio::time::timeout(Duration::from_millis(1250), meter.run()).await;
        assert!(stopped.is_err());
        assert_eq!(meter.stats().cycles, 3);
    }
}
