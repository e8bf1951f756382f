pub mod bh1750;
pub mod crc;
pub mod sgp30;
pub mod sht30;

use embedded_hal::i2c::{self, ErrorKind};
use tracing::debug;

use crate::{error::Fault, error::SensorError, types::Reading};

pub trait SensorDriver {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn compensate(&mut self, _environment: &Environment) -> Result<(), SensorError> {
        Ok(())
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Environment {
    pub temperature_c: Option<f32>,
    pub relative_humidity: Option<f32>,
}

impl Environment {
    /// Records the first temperature and humidity seen; later sensors do not
    /// override earlier ones.
    pub fn observe(&mut self, readings: &[Reading]) {
        for reading in readings {
            match reading.quantity.device_class {
                Some("temperature") => {
                    self.temperature_c.get_or_insert(reading.value);
                }
                Some("humidity") => {
                    self.relative_humidity.get_or_insert(reading.value);
                }
                _ => {}
            }
        }
    }
}

pub struct SensorSet {
    drivers: Vec<Box<dyn SensorDriver>>,
}

impl SensorSet {
    pub fn new(drivers: Vec<Box<dyn SensorDriver>>) -> Self {
        Self { drivers }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|driver| driver.name()).collect()
    }

    pub fn start(&mut self) -> Result<(), Fault> {
        for driver in &mut self.drivers {
            let sensor = driver.name();
            driver
                .start()
                .map_err(|source| Fault::Sensor { sensor, source })?;
        }
        Ok(())
    }

    pub fn measure_all(&mut self) -> Result<Vec<Reading>, Fault> {
        let mut environment = Environment::default();
        let mut readings = Vec::new();

        for driver in &mut self.drivers {
            let sensor = driver.name();
            let fault = |source| Fault::Sensor { sensor, source };

            driver.compensate(&environment).map_err(fault)?;
            let measured = driver.measure().map_err(fault)?;
            debug!("{sensor}: {measured:?}");
            environment.observe(&measured);
            readings.extend(measured);
        }

        Ok(readings)
    }
}

pub(crate) fn bus_error<E: i2c::Error>(err: E) -> SensorError {
    match err.kind() {
        ErrorKind::NoAcknowledge(_) => SensorError::NotFound,
        kind => SensorError::Bus(kind),
    }
}
