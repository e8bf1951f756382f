use embedded_hal::{delay::DelayNs, i2c::I2c};

use super::{bus_error, SensorDriver};
use crate::{
    error::SensorError,
    types::{Reading, LIGHT},
};

pub const DEFAULT_ADDRESS: u8 = 0x23;

const CMD_POWER_ON: u8 = 0x01;
const CMD_RESET: u8 = 0x07;
const CMD_CONTINUOUS_HIGH_RES: u8 = 0x10;

const HIGH_RES_MEASUREMENT_MS: u32 = 180;
const COUNTS_PER_LUX: f32 = 1.2;

pub struct Bh1750<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Bh1750<I, D> {
    pub fn new(i2c: I, delay: D) -> Result<Self, SensorError> {
        Self::with_address(i2c, delay, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, delay: D, address: u8) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            address,
        };
        for command in [CMD_POWER_ON, CMD_RESET, CMD_CONTINUOUS_HIGH_RES] {
            sensor
                .i2c
                .write(sensor.address, &[command])
                .map_err(bus_error)?;
        }
        Ok(sensor)
    }

    pub fn read_lux(&mut self) -> Result<f32, SensorError> {
        let mut raw = [0_u8; 2];
        self.i2c.read(self.address, &mut raw).map_err(bus_error)?;
        Ok(f32::from(u16::from_be_bytes(raw)) / COUNTS_PER_LUX)
    }
}

impl<I: I2c, D: DelayNs> SensorDriver for Bh1750<I, D> {
    fn name(&self) -> &'static str {
        "bh1750"
    }

    fn start(&mut self) -> Result<(), SensorError> {
        self.delay.delay_ms(HIGH_RES_MEASUREMENT_MS);
        Ok(())
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError> {
        Ok(vec![Reading::new(LIGHT, self.read_lux()?)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::testing::{FakeBus, NoDelay};

    #[test]
    fn powers_on_in_continuous_mode() {
        let bus = FakeBus::with_device(DEFAULT_ADDRESS);
        let sensor = Bh1750::new(bus, NoDelay).unwrap();

        let commands: Vec<_> = sensor
            .i2c
            .writes
            .iter()
            .map(|(_, bytes)| bytes[0])
            .collect();
        assert_eq!(commands, vec![0x01, 0x07, 0x10]);
    }

    #[test]
    fn scales_counts_to_lux() {
        let mut bus = FakeBus::with_device(DEFAULT_ADDRESS);
        bus.respond(&[0x01, 0x2C]);
        let mut sensor = Bh1750::new(bus, NoDelay).unwrap();

        let readings = sensor.measure().unwrap();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].quantity, LIGHT);
        assert!((readings[0].value - 250.0).abs() < 0.001);
    }
}
