use ferraris_meter::clock::{wait_for_valid_time, SystemClock};
use ferraris_meter::config::{AppConfig, SinkSettings};
use ferraris_meter::http_sink::HttpSink;
use ferraris_meter::indicator::{Indicator, NoIndicator, SysfsLed};
use ferraris_meter::meter_controller::MeterController;
use ferraris_meter::mqtt_sink::MqttSink;
use ferraris_meter::observability;
use ferraris_meter::sensor::IioSensorPort;
use ferraris_meter::telemetry::{TelemetryPublisher, TelemetrySink};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    info!("Starting Ferraris meter reader");
    let config = AppConfig::from_env()?;

    let clock = SystemClock::new(config.clock.utc_offset_seconds)?;
    let start_timestamp = wait_for_valid_time(
        &clock,
        config.clock.valid_time_floor,
        config.clock.sync_poll_interval,
    )
    .await;

    let sink: Box<dyn TelemetrySink> = match config.sink {
        SinkSettings::Mqtt(settings) => Box::new(MqttSink::new(settings)),
        SinkSettings::Http(settings) => Box::new(HttpSink::new(settings)),
    };
    let mut publisher = TelemetryPublisher::new(sink, config.publisher);
    publisher.connect().await;

    let indicator: Box<dyn Indicator> = match config.status_led_path {
        Some(path) => Box::new(SysfsLed::new(path)),
        None => Box::new(NoIndicator),
    };

    info!(sensor = %config.sensor_path.display(), start_timestamp, "reading meter");
    let port = IioSensorPort::new(&config.sensor_path);
    let mut controller =
        MeterController::new(&config.meter, port, clock, publisher, start_timestamp)
            .with_indicator(indicator);
    controller.run().await;

    Ok(())
}
