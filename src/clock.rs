use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// Earliest epoch time (2021-01-01 12:00 UTC) accepted as a synchronised clock.
pub const VALID_TIME_FLOOR: i64 = 1_609_502_400;

/// Source of wall-clock time for the control loop.
pub trait Clock {
    /// Seconds since the Unix epoch, UTC.
    fn epoch_seconds(&self) -> i64;
    /// Local hour of day, 0..=23.
    fn local_hour(&self) -> u32;
    /// Marker of the local calendar day. Only compared for equality.
    fn local_day(&self) -> i32;
}

/// System time shifted by a fixed UTC offset.
///
/// The offset is an approximation of local time: there is no timezone database and no
/// daylight saving switch.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_seconds: i32) -> anyhow::Result<Self> {
        let Some(offset) = FixedOffset::east_opt(utc_offset_seconds) else {
            anyhow::bail!("UTC offset of {utc_offset_seconds}s is out of range");
        };
        Ok(Self { offset })
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn local_hour(&self) -> u32 {
        self.local_now().hour()
    }

    fn local_day(&self) -> i32 {
        self.local_now().date_naive().num_days_from_ce()
    }
}

/// Clock driven by hand. Clones share the same time, so a test can keep one handle while
/// the controller owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    epoch: Arc<AtomicI64>,
    hour: Arc<AtomicU32>,
    day: Arc<AtomicI32>,
}

impl ManualClock {
    pub fn new(epoch: i64, hour: u32, day: i32) -> Self {
        Self {
            epoch: Arc::new(AtomicI64::new(epoch)),
            hour: Arc::new(AtomicU32::new(hour)),
            day: Arc::new(AtomicI32::new(day)),
        }
    }

    pub fn set_epoch(&self, epoch: i64) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: i64) {
        self.epoch.fetch_add(seconds, Ordering::Relaxed);
    }

    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour, Ordering::Relaxed);
    }

    pub fn set_day(&self, day: i32) {
        self.day.store(day, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn epoch_seconds(&self) -> i64 {
        self.epoch.load(Ordering::Relaxed)
    }

    fn local_hour(&self) -> u32 {
        self.hour.load(Ordering::Relaxed)
    }

    fn local_day(&self) -> i32 {
        self.day.load(Ordering::Relaxed)
    }
}

/// Blocks until the clock reports a time at or past `floor`, polling every `poll_interval`.
/// Never gives up. Returns the first valid epoch time.
pub async fn wait_for_valid_time(clock: &impl Clock, floor: i64, poll_interval: Duration) -> i64 {
    loop {
        let now = clock.epoch_seconds();
        if now >= floor {
            info!(epoch = now, "clock synchronised");
            return now;
        }
        info!(epoch = now, floor, "waiting for valid time");
        sleep(poll_interval).await;
    }
}
