use std::time::Duration;
use tracing::trace;

use rppal::i2c::I2c;

use crate::error::{HwError, Result};
use crate::util::wait_until_with_timeout;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

// Single-shot start / conversion-done flag
const OS_BIT: u16 = 1 << 15;
// PGA +-4.096 V full scale
const PGA_4_096: u16 = 0b001 << 9;
const MODE_SINGLE_SHOT: u16 = 1 << 8;
// 128 samples per second
const DR_128: u16 = 0b100 << 5;
const COMP_DISABLE: u16 = 0b11;
const FULL_SCALE_V: f64 = 4.096;

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    pub fn new(bus: u8, address: u16) -> Result<Self> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| HwError::I2c(e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(Self { i2c })
    }

    /// Single-ended read of `channel` (0..=3) in volts.
    pub fn read_single_ended(&mut self, channel: u8, timeout: Duration) -> Result<f64> {
        if channel > 3 {
            return Err(HwError::InvalidCompartment(channel));
        }
        // MUX 100..111 selects AINx against GND
        let mux = (0b100 | u16::from(channel)) << 12;
        let config = OS_BIT | mux | PGA_4_096 | MODE_SINGLE_SHOT | DR_128 | COMP_DISABLE;
        let [hi, lo] = config.to_be_bytes();
        self.i2c
            .write(&[REG_CONFIG, hi, lo])
            .map_err(|e| HwError::I2c(e.to_string()))?;

        let i2c = &mut self.i2c;
        wait_until_with_timeout(
            || {
                let mut buf = [0u8; 2];
                i2c.write_read(&[REG_CONFIG], &mut buf)
                    .map_err(|e| HwError::I2c(e.to_string()))?;
                Ok(u16::from_be_bytes(buf) & OS_BIT != 0)
            },
            timeout,
            Duration::from_millis(1),
        )?;

        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[REG_CONVERSION], &mut buf)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        let raw = i16::from_be_bytes(buf);
        trace!(raw, channel, "ads1115 raw read");
        Ok(f64::from(raw) * FULL_SCALE_V / 32768.0)
    }
}
