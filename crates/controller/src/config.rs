//! TOML config file loading and validation, with environment overrides for
//! credentials.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
    pub date: DateConfig,
    pub irrigation: IrrigationConfig,
    pub pins: PinConfig,
    pub sensor: SensorConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firebase,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub api_key: String,
    pub email: String,
    pub password: String,
    /// Identity toolkit base; point at the auth emulator for local runs.
    pub identity_url: String,
    /// Secure token endpoint used for refreshes.
    pub token_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: String::new(),
            api_key: String::new(),
            email: String::new(),
            password: String::new(),
            identity_url: "https://identitytoolkit.googleapis.com/v1".into(),
            token_url: "https://securetoken.googleapis.com/v1/token".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub api_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "api.thingspeak.com".into(),
            port: 80,
            path: "/update".into(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DateConfig {
    pub url: String,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            url: "http://worldtimeapi.org/api/timezone/Asia/Kathmandu".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IrrigationConfig {
    /// Raw ADC value above which the soil counts as dry.
    pub threshold: i64,
    /// Many common relay boards are active-low. If yours is active-high, set false.
    pub relay_active_low: bool,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        Self {
            threshold: 3500,
            relay_active_low: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub relay: i64,
    pub dht: i64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self { relay: 14, dht: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhtKind {
    #[default]
    Dht11,
    Dht22,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: DhtKind,
    pub moisture_channel: i64,
    pub ads1115_addr: i64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: DhtKind::Dht11,
            moisture_channel: 0,
            ads1115_addr: 0x48,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_period_ms: u64,
    pub floor_sleep_ms: u64,
    pub sensor_settle_ms: u64,
    pub request_timeout_ms: u64,
    pub telemetry_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 5000,
            floor_sleep_ms: 1000,
            sensor_settle_ms: 2000,
            request_timeout_ms: 10_000,
            telemetry_timeout_ms: 5000,
        }
    }
}

impl TimingConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn floor_sleep(&self) -> Duration {
        Duration::from_millis(self.floor_sleep_ms)
    }

    pub fn sensor_settle(&self) -> Duration {
        Duration::from_millis(self.sensor_settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Hardware limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Top of the 12-bit moisture scale readings are reported in.
const MOISTURE_MAX: i64 = 4095;

/// ADS1115 address pin strapping: GND, VDD, SDA, SCL.
const ADS1115_ADDRS: &[i64] = &[0x48, 0x49, 0x4a, 0x4b];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_store(&mut errors);
        self.validate_telemetry(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_timing(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_store(&self, errors: &mut Vec<String>) {
        let s = &self.store;
        if s.backend != StoreBackend::Firebase {
            return;
        }

        if !s.database_url.starts_with("https://") {
            errors.push(format!(
                "store: database_url {:?} must be an https:// url",
                s.database_url
            ));
        }
        if s.api_key.trim().is_empty() {
            errors.push("store: api_key is empty".to_string());
        }
        if s.email.trim().is_empty() {
            errors.push("store: email is empty".to_string());
        }
        if s.password.is_empty() {
            errors.push("store: password is empty".to_string());
        }
    }

    fn validate_telemetry(&self, errors: &mut Vec<String>) {
        let t = &self.telemetry;
        if !t.enabled {
            return;
        }

        if t.host.trim().is_empty() {
            errors.push("telemetry: host is empty".to_string());
        }
        if t.port == 0 {
            errors.push("telemetry: port must be non-zero".to_string());
        }
        if !t.path.starts_with('/') {
            errors.push(format!("telemetry: path {:?} must start with '/'", t.path));
        }
        if t.api_key.trim().is_empty() {
            errors.push("telemetry: api_key is empty".to_string());
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let threshold = self.irrigation.threshold;
        if !(0..=MOISTURE_MAX).contains(&threshold) {
            errors.push(format!(
                "irrigation: threshold {threshold} out of moisture range [0, {MOISTURE_MAX}]"
            ));
        }

        for (name, pin) in [("relay", self.pins.relay), ("dht", self.pins.dht)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if self.pins.relay == self.pins.dht {
            errors.push(format!(
                "pins: relay and dht both use gpio {}",
                self.pins.relay
            ));
        }

        let ch = self.sensor.moisture_channel;
        if !(0..=3).contains(&ch) {
            errors.push(format!("sensor: moisture_channel {ch} out of range (0-3)"));
        }
        if !ADS1115_ADDRS.contains(&self.sensor.ads1115_addr) {
            errors.push(format!(
                "sensor: ads1115_addr 0x{:02x} is not an ADS1115 address (0x48-0x4b)",
                self.sensor.ads1115_addr
            ));
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        for (name, ms) in [
            ("poll_period_ms", t.poll_period_ms),
            ("floor_sleep_ms", t.floor_sleep_ms),
            ("request_timeout_ms", t.request_timeout_ms),
            ("telemetry_timeout_ms", t.telemetry_timeout_ms),
        ] {
            if ms == 0 {
                errors.push(format!("timing: {name} must be positive"));
            }
        }
    }

    /// Credentials from the environment win over the file so secrets can
    /// stay out of `config.toml`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|var| env::var(var).ok());
    }

    /// Overwrite each credential for which `lookup` yields a non-empty value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 5] = [
            ("STORE_DATABASE_URL", &mut self.store.database_url),
            ("STORE_API_KEY", &mut self.store.api_key),
            ("STORE_EMAIL", &mut self.store.email),
            ("STORE_PASSWORD", &mut self.store.password),
            ("TELEMETRY_API_KEY", &mut self.telemetry.api_key),
        ];
        for (var, field) in overrides {
            if let Some(v) = lookup(var).filter(|v| !v.is_empty()) {
                *field = v;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse a TOML config string. Missing sections take their defaults.
pub fn parse(contents: &str) -> Result<Config> {
    toml::from_str(contents).context("failed to parse config")
}

/// Read, parse, apply environment overrides, and validate a config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config = parse(&contents).with_context(|| format!("in {path}"))?;
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        path,
        backend = ?config.store.backend,
        threshold = config.irrigation.threshold,
        telemetry = config.telemetry.enabled,
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
