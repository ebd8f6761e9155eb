//! ADS1115 16-bit ADC driver over I2C for soil moisture sensing.
//!
//! Reads one single-ended channel at PGA ±4.096 V, 128 SPS, single-shot
//! mode. A capacitive probe reads higher as the soil dries.
//!
//! Results are rescaled to the 12-bit, 0-3.3 V unit the threshold and the
//! dashboard use: 0 at ground, 4095 at 3.3 V and above.

#![cfg_attr(not(feature = "adc"), allow(dead_code))]

#[cfg(feature = "adc")]
use anyhow::Result;
#[cfg(feature = "adc")]
use rppal::i2c::I2c;
#[cfg(feature = "adc")]
use std::thread;
use std::time::Duration;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS      : write 1 to start single-shot conversion
//   [14:12] MUX     : input multiplexer (channel selection)
//   [11:9]  PGA     : programmable gain amplifier
//   [8]     MODE    : 0 = continuous, 1 = single-shot
//   [7:5]   DR      : data rate
//   [4:2]   comparator mode/polarity/latch
//   [1:0]   COMP_QUE: 11 = disable comparator

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// Single-ended MUX codes, AIN0..AIN3 vs GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// ~7.8 ms at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);
const READY_POLLS: usize = 3;

/// Bit 15 of the config register reads 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

/// Config register value for a single-ended read on `channel` (0–3).
fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel & 0b11)] << MUX_SHIFT)
}

/// Counts at 3.3 V with 125 µV per LSB (PGA ±4.096 V).
const SUPPLY_COUNTS: i32 = 26_400;
/// Top of the 12-bit moisture scale.
pub const MOISTURE_MAX: i32 = 4095;

/// Rescale a conversion result to the 12-bit moisture unit. Single-ended
/// results are non-negative; negatives are bus noise and clamp to zero.
fn to_raw(sample: i16) -> i32 {
    let counts = i32::from(sample).max(0);
    (counts * MOISTURE_MAX / SUPPLY_COUNTS).min(MOISTURE_MAX)
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "adc")]
pub struct Ads1115 {
    i2c: I2c,
    channel: u8,
}

#[cfg(feature = "adc")]
impl Ads1115 {
    /// Open I2C bus 1 for the ADS1115 at `addr`, reading `channel`.
    pub fn open(addr: u16, channel: u8) -> Result<Self> {
        anyhow::ensure!(channel <= 3, "ADS1115 channel {channel} out of range (0–3)");

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );

        Ok(Self { i2c, channel })
    }

    /// One single-shot conversion, in 12-bit moisture units.
    pub fn read(&mut self) -> Result<i32> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..READY_POLLS {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(to_raw(i16::from_be_bytes(buf)))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
