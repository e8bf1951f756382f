use std::time::Duration;

use crate::{
    config::NodeConfig,
    error::{ConfigError, Fault, PlatformError},
    sensors::SensorSet,
    types::Color,
};

pub trait Watchdog {
    /// Starts the hardware timer; the device resets if `feed` is not called
    /// again within `timeout`.
    fn arm(&mut self, timeout: Duration) -> Result<(), PlatformError>;

    fn feed(&mut self);
}

pub trait StatusLight {
    fn show(&mut self, color: Color);
}

pub trait Button {
    fn is_pressed(&mut self) -> bool;
}

pub trait Bringup {
    fn load_config(&mut self) -> Result<NodeConfig, ConfigError>;

    fn start_network(&mut self, config: &NodeConfig) -> Result<(), PlatformError>;

    fn network_ready(&mut self) -> bool;

    fn missing_devices(&mut self) -> Result<Vec<u8>, PlatformError>;

    fn init_sensors(&mut self) -> Result<SensorSet, Fault>;
}

pub fn missing_from_scan(required: &[u8], found: &[u8]) -> Vec<u8> {
    required
        .iter()
        .copied()
        .filter(|address| !found.contains(address))
        .collect()
}
