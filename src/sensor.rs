use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default raw channel of the first Linux IIO ADC.
pub const DEFAULT_IIO_PATH: &str = "/sys/bus/iio/devices/iio:device0/in_voltage0_raw";

/// One analog input of the reflective sensor facing the meter disc.
pub trait SensorPort {
    /// Single raw reading in the port's native range.
    fn read_analog(&mut self) -> i32;
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unparseable sensor value '{value}': {source}")]
    Parse {
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Reads the raw value of a Linux IIO channel from sysfs.
///
/// A failed read is reported as 0, which is indistinguishable from a genuine low reading.
#[derive(Debug, Clone)]
pub struct IioSensorPort {
    path: PathBuf,
}

impl IioSensorPort {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn read_raw(&self) -> Result<i32, SensorError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| SensorError::Io {
            path: self.path.clone(),
            source,
        })?;
        let value = raw.trim();
        value.parse().map_err(|source| SensorError::Parse {
            value: value.to_string(),
            source,
        })
    }
}

impl SensorPort for IioSensorPort {
    fn read_analog(&mut self) -> i32 {
        self.read_raw().unwrap_or_else(|e| {
            debug!(error = %e, "sensor read failed");
            0
        })
    }
}

/// Averages a fixed number of raw reads into one distance metric per cycle.
#[derive(Debug)]
pub struct SensorSampler<P> {
    port: P,
    reads_per_sample: NonZeroUsize,
    last_raw: i32,
}

impl<P: SensorPort> SensorSampler<P> {
    pub fn new(port: P, reads_per_sample: NonZeroUsize) -> Self {
        Self {
            port,
            reads_per_sample,
            last_raw: 0,
        }
    }

    /// Arithmetic mean of `reads_per_sample` consecutive reads.
    pub fn sample(&mut self) -> f64 {
        let mut sum = 0.0;
        for _ in 0..self.reads_per_sample.get() {
            self.last_raw = self.port.read_analog();
            sum += self.last_raw as f64;
        }
        sum / self.reads_per_sample.get() as f64
    }

    /// Last raw value read during the most recent sample.
    pub fn last_raw(&self) -> i32 {
        self.last_raw
    }
}
