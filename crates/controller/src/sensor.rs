//! Typed sensor acquisition: raw soil moisture and the temperature/humidity
//! probe. Every read is a single blocking sample.

pub mod adc;
pub mod dht;
#[cfg(feature = "sim")]
pub mod sim;

use anyhow::Result;

/// A valid temperature (°C) / relative humidity (%) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub temperature: f32,
    pub humidity: f32,
}

impl Environment {
    /// `None` when either value is NaN, the probe's fault sentinel.
    pub fn from_raw(temperature: f32, humidity: f32) -> Option<Self> {
        if temperature.is_nan() || humidity.is_nan() {
            None
        } else {
            Some(Self {
                temperature,
                humidity,
            })
        }
    }
}

pub trait SensorReader {
    /// Raw ADC units; higher means drier.
    fn read_moisture(&mut self) -> Result<i32>;

    /// `None` signals a probe fault for this sample.
    fn read_environment(&mut self) -> Option<Environment>;

    /// Motor feedback after each decision. Real sensors ignore it.
    fn observe_motor(&mut self, _on: bool) {}
}

// ---------------------------------------------------------------------------
// Real sensors (production, ADS1115 on I2C + DHT on GPIO)
// ---------------------------------------------------------------------------

#[cfg(all(feature = "adc", feature = "gpio"))]
pub struct HardwareSensors {
    adc: adc::Ads1115,
    probe: dht::Dht,
}

#[cfg(all(feature = "adc", feature = "gpio"))]
impl HardwareSensors {
    pub fn new(adc: adc::Ads1115, probe: dht::Dht) -> Self {
        Self { adc, probe }
    }
}

#[cfg(all(feature = "adc", feature = "gpio"))]
impl SensorReader for HardwareSensors {
    fn read_moisture(&mut self) -> Result<i32> {
        self.adc.read()
    }

    fn read_environment(&mut self) -> Option<Environment> {
        match self.probe.read() {
            Ok(env) => Some(env),
            Err(e) => {
                tracing::debug!("dht read failed: {e:#}");
                None
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
