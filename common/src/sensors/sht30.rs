use embedded_hal::{delay::DelayNs, i2c::I2c};

use super::{bus_error, crc::crc8, SensorDriver};
use crate::{
    error::SensorError,
    types::{Reading, HUMIDITY, TEMPERATURE},
};

pub const DEFAULT_ADDRESS: u8 = 0x44;

const CMD_MEASURE_HIGH_REPEATABILITY_STRETCH: u16 = 0x2C06;
const CMD_SOFT_RESET: u16 = 0x30A2;
const CMD_READ_STATUS: u16 = 0xF32D;

const STATUS_MASK: u16 = 0b1010_1100_0001_0011;
const STATUS_AFTER_RESET: u16 = 0b1000_0000_0001_0000;
const RESET_POLLS: usize = 3;
const RESET_POLL_US: u32 = 500;

pub struct Sht30<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Sht30<I, D> {
    pub fn new(i2c: I, delay: D) -> Result<Self, SensorError> {
        Self::with_address(i2c, delay, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, delay: D, address: u8) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            address,
        };
        sensor.reset()?;
        Ok(sensor)
    }

    pub fn reset(&mut self) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &CMD_SOFT_RESET.to_be_bytes())
            .map_err(bus_error)?;

        for _ in 0..RESET_POLLS {
            self.delay.delay_us(RESET_POLL_US);
            let [status] = self.read_words::<1>(CMD_READ_STATUS)?;
            if status & STATUS_MASK == STATUS_AFTER_RESET {
                return Ok(());
            }
        }
        Err(SensorError::NotFound)
    }

    /// Returns `(temperature °C, relative humidity %)`.
    pub fn read(&mut self) -> Result<(f32, f32), SensorError> {
        let [raw_t, raw_rh] = self.read_words::<2>(CMD_MEASURE_HIGH_REPEATABILITY_STRETCH)?;
        if raw_t == 0 && raw_rh == 0 {
            return Err(SensorError::NotReady);
        }

        let temperature = -45.0 + 175.0 * f32::from(raw_t) / 65535.0;
        let humidity = 100.0 * f32::from(raw_rh) / 65535.0;
        Ok((temperature, humidity))
    }

    fn read_words<const N: usize>(&mut self, command: u16) -> Result<[u16; N], SensorError> {
        let mut frame = [0_u8; 6];
        let frame = &mut frame[..N * 3];
        self.i2c
            .write_read(self.address, &command.to_be_bytes(), frame)
            .map_err(bus_error)?;

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

impl<I: I2c, D: DelayNs> SensorDriver for Sht30<I, D> {
    fn name(&self) -> &'static str {
        "sht30"
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError> {
        let (temperature, humidity) = self.read()?;
        Ok(vec![
            Reading::new(TEMPERATURE, temperature),
            Reading::new(HUMIDITY, humidity),
        ])
    }
}
