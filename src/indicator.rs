use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Status light signalling a freshly counted rotation.
pub trait Indicator: Send {
    fn set(&mut self, lit: bool);
}

/// Used when no status light is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl Indicator for NoIndicator {
    fn set(&mut self, _lit: bool) {}
}

/// LED exposed through the Linux LED class (`/sys/class/leds/<name>/brightness`).
#[derive(Debug, Clone)]
pub struct SysfsLed {
    brightness_path: PathBuf,
}

impl SysfsLed {
    pub fn new(brightness_path: impl AsRef<Path>) -> Self {
        Self {
            brightness_path: brightness_path.as_ref().to_path_buf(),
        }
    }
}

impl Indicator for SysfsLed {
    fn set(&mut self, lit: bool) {
        if let Err(e) = fs::write(&self.brightness_path, if lit { "1" } else { "0" }) {
            debug!(path = %self.brightness_path.display(), error = %e, "cannot switch status LED");
        }
    }
}
