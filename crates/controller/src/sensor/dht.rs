//! DHT11 / DHT22 temperature-humidity probe on a single GPIO line.
//!
//! The probe answers a start pulse with 40 bits: each bit is a ~50 µs low
//! followed by a high whose length encodes the value (~27 µs = 0,
//! ~70 µs = 1). Bytes are humidity hi/lo, temperature hi/lo, checksum.

#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

use anyhow::{ensure, Result};

use super::Environment;
use crate::config::DhtKind;

/// High pulses longer than this are 1-bits.
const ONE_BIT_THRESHOLD_US: u32 = 50;

const FRAME_BITS: usize = 40;

/// Pack measured high-pulse widths (µs) into the five frame bytes, MSB first.
fn pack_bits(high_us: &[u32; FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, &width) in high_us.iter().enumerate() {
        if width > ONE_BIT_THRESHOLD_US {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

/// Check the checksum and convert a frame into engineering units.
fn decode(frame: [u8; 5], kind: DhtKind) -> Result<Environment> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    ensure!(
        sum == frame[4],
        "dht checksum mismatch: computed 0x{sum:02x}, frame 0x{:02x}",
        frame[4]
    );

    let (humidity, temperature) = match kind {
        DhtKind::Dht11 => {
            let humidity = f32::from(frame[0]) + f32::from(frame[1]) / 10.0;
            let magnitude = f32::from(frame[2]) + f32::from(frame[3] & 0x7f) / 10.0;
            let sign = if frame[3] & 0x80 != 0 { -1.0 } else { 1.0 };
            (humidity, sign * magnitude)
        }
        DhtKind::Dht22 => {
            let humidity = f32::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
            let magnitude = f32::from(u16::from_be_bytes([frame[2] & 0x7f, frame[3]])) / 10.0;
            let sign = if frame[2] & 0x80 != 0 { -1.0 } else { 1.0 };
            (humidity, sign * magnitude)
        }
    };

    ensure!(
        (0.0..=100.0).contains(&humidity),
        "dht humidity {humidity} out of range"
    );

    Environment::from_raw(temperature, humidity)
        .ok_or_else(|| anyhow::anyhow!("dht produced a non-numeric reading"))
}

// ---------------------------------------------------------------------------
// GPIO driver (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
mod driver {
    use anyhow::{bail, Result};
    use rppal::gpio::{Gpio, IoPin, Level, Mode, PullUpDown};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{decode, pack_bits, FRAME_BITS};
    use crate::config::DhtKind;
    use crate::sensor::Environment;

    /// Every phase of the answer is well under this.
    const EDGE_TIMEOUT: Duration = Duration::from_micros(120);

    pub struct Dht {
        pin: IoPin,
        kind: DhtKind,
    }

    impl Dht {
        pub fn open(bcm: u8, kind: DhtKind) -> Result<Self> {
            let mut pin = Gpio::new()?.get(bcm)?.into_io(Mode::Output);
            pin.set_high();
            tracing::info!(gpio = bcm, ?kind, "dht probe initialised");
            Ok(Self { pin, kind })
        }

        pub fn read(&mut self) -> Result<Environment> {
            let start_low = match self.kind {
                DhtKind::Dht11 => Duration::from_millis(18),
                DhtKind::Dht22 => Duration::from_millis(2),
            };

            // Host start signal, then release the line to the probe.
            self.pin.set_mode(Mode::Output);
            self.pin.set_low();
            thread::sleep(start_low);
            self.pin.set_high();
            self.pin.set_mode(Mode::Input);
            self.pin.set_pullupdown(PullUpDown::PullUp);

            // Probe response: ~80 µs low, ~80 µs high.
            self.wait_while(Level::High, "response start")?;
            self.wait_while(Level::Low, "response low")?;
            self.wait_while(Level::High, "response high")?;

            let mut high_us = [0u32; FRAME_BITS];
            for width in high_us.iter_mut() {
                self.wait_while(Level::Low, "bit preamble")?;
                let high = self.wait_while(Level::High, "bit value")?;
                *width = u32::try_from(high.as_micros()).unwrap_or(u32::MAX);
            }

            decode(pack_bits(&high_us), self.kind)
        }

        /// Spin until the line leaves `level`; returns how long it stayed.
        fn wait_while(&self, level: Level, phase: &str) -> Result<Duration> {
            let start = Instant::now();
            while self.pin.read() == level {
                if start.elapsed() > EDGE_TIMEOUT {
                    bail!("dht timeout waiting for {phase}");
                }
            }
            Ok(start.elapsed())
        }
    }
}

#[cfg(feature = "gpio")]
pub use driver::Dht;

// ===========================================================================
// Tests
// ===========================================================================
