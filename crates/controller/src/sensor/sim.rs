//! Stateful sensor simulator for running the controller without hardware.
//!
//! Soil moisture follows a random walk in 12-bit ADC units (higher = drier)
//! with a drying drift, electronic noise, and a closed-loop response to the
//! motor. Temperature and humidity follow a slow day/night cycle and the
//! probe occasionally faults the way a DHT does (both values NaN).

use anyhow::Result;
use std::fmt;

use super::{Environment, SensorReader};

/// Bone-dry reading of a capacitive probe on a 12-bit ADC.
const RAW_DRY: f64 = 4095.0;
/// Reading in saturated soil.
const RAW_WET: f64 = 1500.0;

/// Drop per sample while the motor runs.
const WET_RATE: f64 = -120.0;

/// Simulated day length; short so a dev session sees the whole cycle.
const DIURNAL_PERIOD_S: f64 = 600.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profile selected with the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily; crosses the default threshold
    /// within a couple of minutes.
    Drying,
    /// Hovers in place with little noise.
    Stable,
    /// Noisy readings and frequent probe faults.
    Flaky,
    /// Starts near the wet end and barely dries.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SimSensors {
    /// Current "true" moisture in ADC units.
    base: f64,
    drift: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    fault_prob: f32,
    watering: bool,
}

impl SimSensors {
    pub fn new(scenario: Scenario) -> Self {
        // start_frac: 0.0 = RAW_WET, 1.0 = RAW_DRY
        let (drift, walk_sigma, noise_sigma, fault_prob, start_frac) = match scenario {
            Scenario::Drying => (40.0, 25.0, 15.0, 0.03_f32, 0.6),
            Scenario::Stable => (0.0, 10.0, 5.0, 0.005, 0.5),
            Scenario::Flaky => (20.0, 40.0, 60.0, 0.15, 0.6),
            Scenario::Wet => (5.0, 15.0, 10.0, 0.02, 0.2),
        };

        tracing::info!(%scenario, "sensor simulator initialised");

        Self {
            base: RAW_WET + start_frac * (RAW_DRY - RAW_WET),
            drift,
            walk_sigma,
            noise_sigma,
            fault_prob,
            watering: false,
        }
    }

    /// Fraction of the simulated day, 0.0..1.0.
    fn day_phase(&self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (now_s % DIURNAL_PERIOD_S) / DIURNAL_PERIOD_S
    }
}

impl SensorReader for SimSensors {
    fn read_moisture(&mut self) -> Result<i32> {
        let wet = if self.watering { WET_RATE } else { 0.0 };
        let walk = gaussian(0.0, self.walk_sigma);
        self.base = (self.base + self.drift + wet + walk).clamp(RAW_WET, RAW_DRY);

        let reading = self.base + gaussian(0.0, self.noise_sigma);
        Ok(reading.round().clamp(0.0, RAW_DRY) as i32)
    }

    fn read_environment(&mut self) -> Option<Environment> {
        if fastrand::f32() < self.fault_prob {
            return Environment::from_raw(f32::NAN, f32::NAN);
        }

        let phase = (2.0 * std::f64::consts::PI * self.day_phase()).sin();
        let temperature = 24.0 + 4.0 * phase + gaussian(0.0, 0.3);
        // Relative humidity falls as the air warms.
        let humidity = (55.0 - 10.0 * phase + gaussian(0.0, 1.0)).clamp(0.0, 100.0);

        // DHT resolution is 0.1.
        let tenth = |v: f64| ((v * 10.0).round() / 10.0) as f32;
        Environment::from_raw(tenth(temperature), tenth(humidity))
    }

    fn observe_motor(&mut self, on: bool) {
        self.watering = on;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
