/// Result of estimating the instantaneous power for one rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerReading {
    /// No previous rotation to measure against. The rotation still counts.
    FirstRotation,
    Accepted { watts: f64 },
    /// Physically impossible reading. The rotation is discarded as noise.
    Rejected { watts: f64 },
}

/// Derives power from the time between two rotations of the meter disc.
#[derive(Debug, Clone)]
pub struct PowerEstimator {
    watt_per_round_per_minute: f64,
    implausible_ceiling_watts: f64,
}

impl PowerEstimator {
    pub fn new(watt_per_round_per_minute: f64, implausible_ceiling_watts: f64) -> Self {
        Self {
            watt_per_round_per_minute,
            implausible_ceiling_watts,
        }
    }

    /// `last_rotation` is the epoch time of the previous accepted rotation, 0 if none.
    pub fn estimate(&self, timestamp: i64, last_rotation: i64) -> PowerReading {
        if last_rotation == 0 {
            return PowerReading::FirstRotation;
        }

        let elapsed = timestamp - last_rotation;
        if elapsed <= 0 {
            // A rotation at or before the previous one cannot be measured
            return PowerReading::Rejected {
                watts: f64::INFINITY,
            };
        }

        let watts = 60.0 * self.watt_per_round_per_minute / elapsed as f64;
        if watts >= self.implausible_ceiling_watts {
            PowerReading::Rejected { watts }
        } else {
            PowerReading::Accepted { watts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> PowerEstimator {
        PowerEstimator::new(800.0, 4800.0)
    }

    #[test]
    fn test_first_rotation_has_no_power() {
        assert_eq!(estimator().estimate(1000, 0), PowerReading::FirstRotation);
    }

    #[test]
    fn test_power_from_rotation_interval() {
        match estimator().estimate(1045, 1000) {
            PowerReading::Accepted { watts } => assert!((watts - 1066.666_666).abs() < 1e-3),
            other => panic!("Expected accepted reading, got {other:?}"),
        }
    }

    #[test]
    fn test_fast_rotation_is_rejected() {
        assert_eq!(
            estimator().estimate(1004, 1000),
            PowerReading::Rejected { watts: 12000.0 }
        );
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        // 48000 / 10 = 4800 exactly
        assert_eq!(
            estimator().estimate(1010, 1000),
            PowerReading::Rejected { watts: 4800.0 }
        );
        assert_eq!(
            estimator().estimate(1011, 1000),
            PowerReading::Accepted {
                watts: 48000.0 / 11.0
            }
        );
    }

    #[test]
    fn test_non_positive_interval_is_rejected() {
        assert!(matches!(
            estimator().estimate(1000, 1000),
            PowerReading::Rejected { .. }
        ));
        assert!(matches!(
            estimator().estimate(990, 1000),
            PowerReading::Rejected { .. }
        ));
    }
}
