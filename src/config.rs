use crate::clock::VALID_TIME_FLOOR;
use crate::detector::{Debounce, NightHours};
use crate::http_sink::HttpSettings;
use crate::mqtt_sink::MqttSettings;
use crate::sensor::DEFAULT_IIO_PATH;
use crate::telemetry::{PublisherSettings, RetryPolicy, DEFAULT_TOPIC};
use anyhow::anyhow;
use std::env;
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Calibration and detection parameters of the meter.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterConfig {
    /// Averaged sensor value at or above which the disc marker is considered in view.
    pub sensor_threshold: f64,
    /// Disc rotations per kWh, printed on the meter.
    pub rounds_per_kwh: u32,
    /// Power drawn when the disc turns once per minute.
    pub watt_per_round_per_minute: f64,
    pub day_debounce: Debounce,
    pub night_debounce: Debounce,
    pub implausible_ceiling_watts: f64,
    pub night_hours: NightHours,
    pub cycle_delay: Duration,
    pub samples_per_cycle: NonZeroUsize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            sensor_threshold: 30.0,
            rounds_per_kwh: 75,
            watt_per_round_per_minute: 800.0,
            // 20 and 30 cycles are roughly 10 and 15 seconds at the default cycle delay
            day_debounce: Debounce::Ticks(20),
            night_debounce: Debounce::Ticks(30),
            implausible_ceiling_watts: 4800.0,
            night_hours: NightHours::default(),
            cycle_delay: Duration::from_millis(500),
            samples_per_cycle: NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSettings {
    /// Fixed offset used for local hour and calendar day. Not DST aware.
    pub utc_offset_seconds: i32,
    pub valid_time_floor: i64,
    pub sync_poll_interval: Duration,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            utc_offset_seconds: 3600,
            valid_time_floor: VALID_TIME_FLOOR,
            sync_poll_interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSettings {
    Mqtt(MqttSettings),
    Http(HttpSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub meter: MeterConfig,
    pub clock: ClockSettings,
    pub publisher: PublisherSettings,
    pub sink: SinkSettings,
    pub sensor_path: PathBuf,
    pub status_led_path: Option<PathBuf>,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. Unset or blank keys take their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let vars = Vars(lookup);
        let defaults = MeterConfig::default();

        let meter = MeterConfig {
            sensor_threshold: vars
                .parse_or("METER_SENSOR_THRESHOLD", defaults.sensor_threshold)?,
            rounds_per_kwh: vars.parse_or("METER_ROUNDS_PER_KWH", defaults.rounds_per_kwh)?,
            watt_per_round_per_minute: vars.parse_or(
                "METER_WATT_PER_ROUND_PER_MINUTE",
                defaults.watt_per_round_per_minute,
            )?,
            day_debounce: vars.debounce(
                "METER_DAY_DEBOUNCE_SECS",
                "METER_DAY_DEBOUNCE_TICKS",
                20,
            )?,
            night_debounce: vars.debounce(
                "METER_NIGHT_DEBOUNCE_SECS",
                "METER_NIGHT_DEBOUNCE_TICKS",
                30,
            )?,
            implausible_ceiling_watts: vars.parse_or(
                "METER_IMPLAUSIBLE_CEILING_WATTS",
                defaults.implausible_ceiling_watts,
            )?,
            night_hours: NightHours {
                start: vars.parse_or("METER_NIGHT_HOUR_START", defaults.night_hours.start)?,
                end: vars.parse_or("METER_NIGHT_HOUR_END", defaults.night_hours.end)?,
            },
            cycle_delay: Duration::from_millis(vars.parse_or("METER_CYCLE_DELAY_MS", 500)?),
            samples_per_cycle: vars
                .parse_or("METER_SAMPLES_PER_CYCLE", defaults.samples_per_cycle)?,
        };
        meter.validate()?;

        let clock = ClockSettings {
            utc_offset_seconds: vars.parse_or("METER_UTC_OFFSET_SECONDS", 3600)?,
            ..ClockSettings::default()
        };

        let publisher = PublisherSettings {
            topic: vars
                .string("MQTT_TOPIC")
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            retain: true,
            retry: RetryPolicy {
                max_attempts: vars.parse_or("PUBLISH_MAX_ATTEMPTS", 5)?,
                retry_delay: Duration::from_millis(
                    vars.parse_or("PUBLISH_RETRY_DELAY_MS", 2000)?,
                ),
            },
        };
        if publisher.retry.max_attempts == 0 {
            anyhow::bail!("PUBLISH_MAX_ATTEMPTS must be at least 1");
        }

        let sink_kind = vars.string("TELEMETRY_SINK").unwrap_or_else(|| "mqtt".to_string());
        let sink = match sink_kind.to_ascii_lowercase().as_str() {
            "mqtt" => {
                let mqtt_defaults = MqttSettings::default();
                SinkSettings::Mqtt(MqttSettings {
                    host: vars
                        .string("MQTT_SERVER")
                        .ok_or_else(|| anyhow!("MQTT_SERVER is required for the mqtt sink"))?,
                    port: vars.parse_or("MQTT_PORT", mqtt_defaults.port)?,
                    client_id: vars
                        .string("MQTT_CLIENT_ID")
                        .unwrap_or(mqtt_defaults.client_id),
                    username: vars.string("MQTT_USER"),
                    password: vars.string("MQTT_PASSWORD"),
                    ..mqtt_defaults
                })
            }
            "http" => SinkSettings::Http(HttpSettings {
                endpoint_url: vars
                    .string("TELEMETRY_URL")
                    .ok_or_else(|| anyhow!("TELEMETRY_URL is required for the http sink"))?,
                auth_token: vars.string("TELEMETRY_TOKEN"),
            }),
            other => anyhow::bail!("Unknown TELEMETRY_SINK '{other}', expected mqtt or http"),
        };

        Ok(Self {
            meter,
            clock,
            publisher,
            sink,
            sensor_path: vars
                .string("SENSOR_IIO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IIO_PATH)),
            status_led_path: vars.string("STATUS_LED_PATH").map(PathBuf::from),
        })
    }
}

impl MeterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rounds_per_kwh == 0 {
            anyhow::bail!("rounds per kWh must be greater than zero");
        }
        if !(self.watt_per_round_per_minute.is_finite() && self.watt_per_round_per_minute > 0.0) {
            anyhow::bail!("watt per round per minute must be a positive number");
        }
        if !(self.implausible_ceiling_watts.is_finite() && self.implausible_ceiling_watts > 0.0) {
            anyhow::bail!("implausible power ceiling must be a positive number");
        }
        if !self.sensor_threshold.is_finite() {
            anyhow::bail!("sensor threshold must be a finite number");
        }
        if self.night_hours.start > 23 || self.night_hours.end > 23 {
            anyhow::bail!(
                "night hours {}..{} are outside 0..=23",
                self.night_hours.start,
                self.night_hours.end
            );
        }
        Ok(())
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow!("invalid value '{raw}' for {key}: {e}")),
            None => Ok(default),
        }
    }

    /// Wall-clock debounce when `secs_key` is set, tick based otherwise.
    fn debounce(
        &self,
        secs_key: &str,
        ticks_key: &str,
        default_ticks: u32,
    ) -> anyhow::Result<Debounce> {
        if self.string(secs_key).is_some() {
            let secs: u64 = self.parse_or(secs_key, 0)?;
            return Ok(Debounce::WallClock(Duration::from_secs(secs)));
        }
        Ok(Debounce::Ticks(self.parse_or(ticks_key, default_ticks)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("MQTT_SERVER", "broker.local")]).unwrap();
        assert_eq!(config.meter, MeterConfig::default());
        assert_eq!(config.meter.samples_per_cycle.get(), 50);
        assert_eq!(config.clock, ClockSettings::default());
        assert_eq!(config.publisher, PublisherSettings::default());
        assert_eq!(config.sensor_path, PathBuf::from(DEFAULT_IIO_PATH));
        assert!(config.status_led_path.is_none());
        match config.sink {
            SinkSettings::Mqtt(mqtt) => {
                assert_eq!(mqtt.host, "broker.local");
                assert_eq!(mqtt.port, 1883);
                assert_eq!(mqtt.client_id, "ESP8266Client");
            }
            other => panic!("Expected MQTT sink, got {other:?}"),
        }
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MQTT_SERVER", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "meter"),
            ("MQTT_PASSWORD", "secret"),
            ("METER_SENSOR_THRESHOLD", "42.5"),
            ("METER_ROUNDS_PER_KWH", "96"),
            ("METER_DAY_DEBOUNCE_TICKS", "10"),
            ("METER_NIGHT_DEBOUNCE_SECS", "12"),
            ("METER_CYCLE_DELAY_MS", "250"),
            ("METER_SAMPLES_PER_CYCLE", "8"),
            ("METER_UTC_OFFSET_SECONDS", "-18000"),
            ("PUBLISH_MAX_ATTEMPTS", "2"),
            ("STATUS_LED_PATH", "/sys/class/leds/status/brightness"),
        ])
        .unwrap();

        assert_eq!(config.meter.sensor_threshold, 42.5);
        assert_eq!(config.meter.rounds_per_kwh, 96);
        assert_eq!(config.meter.day_debounce, Debounce::Ticks(10));
        assert_eq!(
            config.meter.night_debounce,
            Debounce::WallClock(Duration::from_secs(12))
        );
        assert_eq!(config.meter.cycle_delay, Duration::from_millis(250));
        assert_eq!(config.meter.samples_per_cycle.get(), 8);
        assert_eq!(config.clock.utc_offset_seconds, -18000);
        assert_eq!(config.publisher.retry.max_attempts, 2);
        assert_eq!(
            config.status_led_path,
            Some(PathBuf::from("/sys/class/leds/status/brightness"))
        );
        match config.sink {
            SinkSettings::Mqtt(mqtt) => {
                assert_eq!(mqtt.port, 8883);
                assert_eq!(mqtt.username.as_deref(), Some("meter"));
                assert_eq!(mqtt.password.as_deref(), Some("secret"));
            }
            other => panic!("Expected MQTT sink, got {other:?}"),
        }
    }

    #[test]
    fn test_http_sink_selection() {
        let config = load(&[
            ("TELEMETRY_SINK", "HTTP"),
            ("TELEMETRY_URL", "http://collector.local/api"),
            ("TELEMETRY_TOKEN", "abc"),
        ])
        .unwrap();
        assert_eq!(
            config.sink,
            SinkSettings::Http(HttpSettings {
                endpoint_url: "http://collector.local/api".to_string(),
                auth_token: Some("abc".to_string()),
            })
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = load(&[("MQTT_SERVER", "b"), ("METER_ROUNDS_PER_KWH", "many")]).unwrap_err();
        assert!(err.to_string().contains("METER_ROUNDS_PER_KWH"));

        assert!(load(&[("MQTT_SERVER", "b"), ("METER_ROUNDS_PER_KWH", "0")]).is_err());
        assert!(load(&[("MQTT_SERVER", "b"), ("METER_SAMPLES_PER_CYCLE", "0")]).is_err());
        assert!(load(&[("MQTT_SERVER", "b"), ("METER_NIGHT_HOUR_START", "24")]).is_err());
        assert!(load(&[("MQTT_SERVER", "b"), ("PUBLISH_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("TELEMETRY_SINK", "carrier-pigeon")]).is_err());
    }

    #[test]
    fn test_sink_endpoint_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("MQTT_SERVER"));
        assert!(load(&[("TELEMETRY_SINK", "http")]).is_err());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("MQTT_SERVER", "b"), ("METER_SENSOR_THRESHOLD", "  ")]).unwrap();
        assert_eq!(config.meter.sensor_threshold, 30.0);
    }
}
