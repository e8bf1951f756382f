use embedded_hal::{delay::DelayNs, i2c::I2c};

use super::{
    bus_error,
    crc::{crc8, word_with_crc},
    Environment, SensorDriver,
};
use crate::{
    error::SensorError,
    types::{Reading, ECO2, TVOC},
};

pub const DEFAULT_ADDRESS: u8 = 0x58;

const CMD_INIT_AIR_QUALITY: u16 = 0x2003;
const CMD_MEASURE_AIR_QUALITY: u16 = 0x2008;
const CMD_SET_HUMIDITY: u16 = 0x2061;
const CMD_GET_FEATURE_SET: u16 = 0x202F;

const INIT_MS: u32 = 10;
const MEASURE_MS: u32 = 12;
const SET_HUMIDITY_MS: u32 = 10;
const FEATURE_SET_MS: u32 = 10;

const PRODUCT_TYPE_MASK: u16 = 0xF000;

pub fn absolute_humidity(temperature_c: f32, relative_humidity: f32) -> f32 {
    let saturation = 6.112 * ((17.62 * temperature_c) / (243.12 + temperature_c)).exp();
    let vapour_pressure = relative_humidity / 100.0 * saturation;
    216.7 * vapour_pressure / (273.15 + temperature_c)
}

/// 8.8 fixed point as expected by Set_humidity. Zero turns compensation off.
fn humidity_ticks(grams_per_m3: f32) -> u16 {
    (grams_per_m3 * 256.0).round().clamp(0.0, f32::from(u16::MAX)) as u16
}

pub struct Sgp30<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Sgp30<I, D> {
    pub fn new(i2c: I, delay: D) -> Result<Self, SensorError> {
        Self::with_address(i2c, delay, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, delay: D, address: u8) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            address,
        };
        let [feature_set] = sensor.command_words::<1>(CMD_GET_FEATURE_SET, FEATURE_SET_MS)?;
        if feature_set & PRODUCT_TYPE_MASK != 0 {
            return Err(SensorError::NotFound);
        }
        Ok(sensor)
    }

    pub fn set_absolute_humidity(&mut self, grams_per_m3: f32) -> Result<(), SensorError> {
        let [cmd_hi, cmd_lo] = CMD_SET_HUMIDITY.to_be_bytes();
        let [hi, lo, crc] = word_with_crc(humidity_ticks(grams_per_m3));
        self.i2c
            .write(self.address, &[cmd_hi, cmd_lo, hi, lo, crc])
            .map_err(bus_error)?;
        self.delay.delay_ms(SET_HUMIDITY_MS);
        Ok(())
    }

    /// Returns `(eCO2 ppm, TVOC ppb)`.
    pub fn read(&mut self) -> Result<(u16, u16), SensorError> {
        let [eco2, tvoc] = self.command_words::<2>(CMD_MEASURE_AIR_QUALITY, MEASURE_MS)?;
        Ok((eco2, tvoc))
    }

    fn command_words<const N: usize>(
        &mut self,
        command: u16,
        wait_ms: u32,
    ) -> Result<[u16; N], SensorError> {
        self.i2c
            .write(self.address, &command.to_be_bytes())
            .map_err(bus_error)?;
        self.delay.delay_ms(wait_ms);

        let mut frame = [0_u8; 6];
        let frame = &mut frame[..N * 3];
        self.i2c.read(self.address, frame).map_err(bus_error)?;

        let mut words = [0_u16; N];
        for (word, chunk) in words.iter_mut().zip(frame.chunks_exact(3)) {
            if crc8(&chunk[..2]) != chunk[2] {
                return Err(SensorError::Checksum);
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }
}

impl<I: I2c, D: DelayNs> SensorDriver for Sgp30<I, D> {
    fn name(&self) -> &'static str {
        "sgp30"
    }

    fn start(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &CMD_INIT_AIR_QUALITY.to_be_bytes())
            .map_err(bus_error)?;
        self.delay.delay_ms(INIT_MS);
        Ok(())
    }

    fn compensate(&mut self, environment: &Environment) -> Result<(), SensorError> {
        match (environment.temperature_c, environment.relative_humidity) {
            (Some(temperature), Some(humidity)) => {
                self.set_absolute_humidity(absolute_humidity(temperature, humidity))
            }
            _ => Ok(()),
        }
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError> {
        let (eco2, tvoc) = self.read()?;
        Ok(vec![
            Reading::new(ECO2, f32::from(eco2)),
            Reading::new(TVOC, f32::from(tvoc)),
        ])
    }
}
