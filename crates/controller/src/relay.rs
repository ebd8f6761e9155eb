//! Irrigation relay output. The `gpio` feature gates the real rppal pin;
//! without it, a mock pin logs level changes to the tracing output.

#[cfg(feature = "gpio")]
use anyhow::Result;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// Electrical level of the relay control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Map a requested motor state to the control-line level.
///
/// Active-low boards (the common cheap relay modules) energise on LOW.
/// This is the only place polarity is decided.
pub fn level_for(on: bool, active_low: bool) -> Level {
    match (on, active_low) {
        (true, true) | (false, false) => Level::Low,
        (true, false) | (false, true) => Level::High,
    }
}

/// A single digital output that drives the relay coil.
pub trait RelayPin {
    fn write(&mut self, level: Level);
}

/// Relay with a fixed polarity. Starts de-energised.
pub struct Relay<P> {
    pin: P,
    active_low: bool,
}

impl<P: RelayPin> Relay<P> {
    pub fn new(mut pin: P, active_low: bool) -> Self {
        // Fail-safe: motor off at startup
        pin.write(level_for(false, active_low));
        Self { pin, active_low }
    }

    pub fn set(&mut self, on: bool) {
        let level = level_for(on, self.active_low);
        self.pin.write(level);
        tracing::debug!(on, ?level, "relay driven");
    }

    #[cfg(test)]
    pub fn pin(&self) -> &P {
        &self.pin
    }

    #[cfg(test)]
    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }
}

// ---------------------------------------------------------------------------
// Real GPIO pin (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct GpioPin {
    pin: OutputPin,
}

#[cfg(feature = "gpio")]
impl GpioPin {
    pub fn open(bcm: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(bcm)?.into_output();
        tracing::info!(gpio = bcm, "relay pin opened");
        Ok(Self { pin })
    }
}

#[cfg(feature = "gpio")]
impl RelayPin for GpioPin {
    fn write(&mut self, level: Level) {
        match level {
            Level::Low => self.pin.set_low(),
            Level::High => self.pin.set_high(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock pin (development, no hardware, logs and records every write)
// ---------------------------------------------------------------------------

#[cfg(any(test, not(feature = "gpio")))]
#[derive(Debug, Default)]
pub struct MockPin {
    pub writes: Vec<Level>,
}

#[cfg(any(test, not(feature = "gpio")))]
impl RelayPin for MockPin {
    fn write(&mut self, level: Level) {
        tracing::info!("[mock-gpio] relay line set {level:?}");
        self.writes.push(level);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
