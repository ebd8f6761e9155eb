#![allow(async_fn_in_trait)]

mod config;
mod controller;
mod datetime;
mod poll;
mod relay;
mod sensor;
mod store;
mod telemetry;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use std::env;
use tracing_subscriber::EnvFilter;

use config::{Config, StoreBackend};
use controller::IrrigationController;
use datetime::HttpDateSource;
use poll::PollLoop;
use relay::Relay;
use sensor::SensorReader;
use store::{AnyStore, FirebaseStore, MemoryStore};
use telemetry::ThingSpeak;

#[cfg(not(any(feature = "sim", all(feature = "adc", feature = "gpio"))))]
compile_error!("no sensor source: enable `sim`, or both `adc` and `gpio`");

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Relay ───────────────────────────────────────────────────────
    #[cfg(feature = "gpio")]
    let pin = relay::GpioPin::open(cfg.pins.relay as u8)?;
    #[cfg(not(feature = "gpio"))]
    let pin = relay::MockPin::default();
    let relay = Relay::new(pin, cfg.irrigation.relay_active_low);

    // ── Remote store ────────────────────────────────────────────────
    let store = build_store(&cfg).await?;
    let controller = IrrigationController::new(relay, store, cfg.irrigation.threshold as i32);

    // ── Sensors ─────────────────────────────────────────────────────
    let sensors = build_sensors(&cfg)?;

    // ── Telemetry + timestamps ──────────────────────────────────────
    let telemetry = if cfg.telemetry.enabled {
        Some(ThingSpeak::new(&cfg.telemetry, cfg.timing.telemetry_timeout())?)
    } else {
        tracing::info!("telemetry disabled");
        None
    };
    let dates = HttpDateSource::new(&cfg.date.url, cfg.timing.request_timeout())?;

    PollLoop::new(controller, sensors, telemetry, dates, &cfg.timing)
        .run()
        .await;
    Ok(())
}

/// A failed first sign-in is not fatal: the poll loop retries through
/// `ready()` and skips remote work until it succeeds.
async fn build_store(cfg: &Config) -> Result<AnyStore> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory store");
            Ok(AnyStore::Memory(MemoryStore::new()))
        }
        StoreBackend::Firebase => {
            let mut store = FirebaseStore::new(&cfg.store, cfg.timing.request_timeout())?;
            match store.sign_in().await {
                Ok(()) => tracing::info!("store signed in"),
                Err(e) => tracing::warn!("store sign-in failed, will retry: {e:#}"),
            }
            Ok(AnyStore::Firebase(store))
        }
    }
}

#[cfg(all(feature = "adc", feature = "gpio"))]
fn build_sensors(cfg: &Config) -> Result<impl SensorReader> {
    use sensor::{adc::Ads1115, dht::Dht, HardwareSensors};

    let adc = Ads1115::open(
        cfg.sensor.ads1115_addr as u16,
        cfg.sensor.moisture_channel as u8,
    )?;
    let probe = Dht::open(cfg.pins.dht as u8, cfg.sensor.kind)?;
    Ok(HardwareSensors::new(adc, probe))
}

#[cfg(all(feature = "sim", not(all(feature = "adc", feature = "gpio"))))]
fn build_sensors(_cfg: &Config) -> Result<impl SensorReader> {
    use sensor::sim::{Scenario, SimSensors};

    let scenario = env::var("SIM_SCENARIO")
        .map(|s| Scenario::from_str_lossy(&s))
        .unwrap_or(Scenario::Drying);
    tracing::info!(%scenario, "using simulated sensors");
    Ok(SimSensors::new(scenario))
}
