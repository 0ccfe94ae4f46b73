//! Ferraris Meter Reader Library
//!
//! This library turns the analog readings of a reflective sensor mounted on a mechanical
//! (Ferraris) electricity meter into counted disc rotations, derives power and energy
//! consumption from them and publishes telemetry snapshots to a remote collector.

pub mod clock;
pub mod config;
pub mod detector;
pub mod http_sink;
pub mod indicator;
pub mod meter_controller;
pub mod mqtt_sink;
pub mod observability;
pub mod power;
pub mod sensor;
pub mod state;
pub mod telemetry;

// Re-export commonly used types for easier access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, MeterConfig, SinkSettings};
pub use detector::{Debounce, RotationDetector, RotationEvent, Suppression};
pub use http_sink::HttpSink;
pub use meter_controller::{CycleOutcome, CycleReport, MeterController, MeterStats};
pub use mqtt_sink::MqttSink;
pub use sensor::{IioSensorPort, SensorPort, SensorSampler};
pub use state::MeterState;
pub use telemetry::{PublishOutcome, SinkError, Snapshot, TelemetryPublisher, TelemetrySink};
