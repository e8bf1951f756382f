use core::convert::TryInto;
use std::{cell::RefCell, thread, time::Duration};

use anyhow::Context;
use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyInputPin, Input, InputPin, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{info, warn};

use airnode_common::{
    platform::missing_from_scan,
    sensors::{bh1750::{self, Bh1750}, sgp30::{self, Sgp30}, sht30::{self, Sht30}, SensorDriver},
    Bringup, Button, ConfigError, Exit, Fault, NodeConfig, PlatformError, SensorError, SensorSet,
    Supervisor, TcpConnector, Watchdog,
};

use crate::led::Ws2812;

const NVS_NAMESPACE: &str = "airnode";
const NVS_CONFIG_KEY: &str = "config_json";
const I2C_BAUDRATE_KHZ: u32 = 400;
const REQUIRED_DEVICES: [u8; 3] = [
    bh1750::DEFAULT_ADDRESS,
    sht30::DEFAULT_ADDRESS,
    sgp30::DEFAULT_ADDRESS,
];

type SharedBus = RefCellDevice<'static, I2cDriver<'static>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    esp_idf_svc::io::vfs::initialize_eventfd(5).context("failed to register eventfd")?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let mut button = PinDriver::input(pins.gpio9.downgrade_input())?;
    button.set_pull(Pull::Up)?;
    let light = Ws2812::new(peripherals.rmt.channel0, pins.gpio2)?;

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        pins.gpio1,
        pins.gpio0,
        &I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into()),
    )
    .context("failed to init i2c bus")?;
    let bus: &'static RefCell<I2cDriver<'static>> = Box::leak(Box::new(RefCell::new(i2c)));

    let wifi = EspWifi::new(peripherals.modem, sys_loop, Some(nvs.clone()))
        .context("failed to init wifi driver")?;

    let mut board = EspBoard { nvs, wifi, bus };
    let supervisor = Supervisor::new(TaskWatchdog, light, BootButton(button));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    match runtime.block_on(supervisor.run(&mut board, TcpConnector::new())) {
        Exit::SafeMode => {
            warn!("safe mode, leaving firmware idle");
            Ok(())
        }
        Exit::Reboot(_) => {
            info!("restarting");
            unsafe { esp_idf_svc::sys::esp_restart() }
        }
        Exit::Stalled(_) => loop {
            thread::sleep(Duration::from_secs(1));
        },
    }
}

struct EspBoard {
    nvs: EspDefaultNvsPartition,
    wifi: EspWifi<'static>,
    bus: &'static RefCell<I2cDriver<'static>>,
}

impl Bringup for EspBoard {
    fn load_config(&mut self) -> Result<NodeConfig, ConfigError> {
        let store = |err: esp_idf_svc::sys::EspError| ConfigError::Store(err.to_string());
        let nvs = EspNvs::new(self.nvs.clone(), NVS_NAMESPACE, true).map_err(store)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer).map_err(store)? {
            Some(raw) => NodeConfig::from_json(raw),
            None => Err(ConfigError::Store(format!(
                "no `{NVS_CONFIG_KEY}` in namespace `{NVS_NAMESPACE}`"
            ))),
        }
    }

    fn start_network(&mut self, config: &NodeConfig) -> Result<(), PlatformError> {
        let auth_method = if config.wifi_key.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let client = ClientConfiguration {
            ssid: config
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| PlatformError::Network("wifi ssid too long".into()))?,
            password: config
                .wifi_key
                .as_str()
                .try_into()
                .map_err(|_| PlatformError::Network("wifi key too long".into()))?,
            auth_method,
            ..Default::default()
        };

        let network = |err: esp_idf_svc::sys::EspError| PlatformError::Network(err.to_string());
        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(network)?;
        self.wifi.start().map_err(network)?;
        self.wifi.connect().map_err(network)?;
        Ok(())
    }

    fn network_ready(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn missing_devices(&mut self) -> Result<Vec<u8>, PlatformError> {
        let mut device = RefCellDevice::new(self.bus);
        let found: Vec<u8> = (0x08..0x78)
            .filter(|address| device.write(*address, &[]).is_ok())
            .collect();
        Ok(missing_from_scan(&REQUIRED_DEVICES, &found))
    }

    fn init_sensors(&mut self) -> Result<SensorSet, Fault> {
        let light = Bh1750::new(self.device(), FreeRtos).map_err(sensor_fault("bh1750"))?;
        let climate = Sht30::new(self.device(), FreeRtos).map_err(sensor_fault("sht30"))?;
        let air = Sgp30::new(self.device(), FreeRtos).map_err(sensor_fault("sgp30"))?;

        let drivers: Vec<Box<dyn SensorDriver>> =
            vec![Box::new(light), Box::new(climate), Box::new(air)];
        Ok(SensorSet::new(drivers))
    }
}

impl EspBoard {
    fn device(&self) -> SharedBus {
        RefCellDevice::new(self.bus)
    }
}

fn sensor_fault(sensor: &'static str) -> impl Fn(SensorError) -> Fault {
    move |source| Fault::Sensor { sensor, source }
}

// Subscribes the thread running the supervisor.
struct TaskWatchdog;

impl Watchdog for TaskWatchdog {
    fn arm(&mut self, timeout: Duration) -> Result<(), PlatformError> {
        let config = esp_idf_svc::sys::esp_task_wdt_config_t {
            timeout_ms: timeout.as_millis() as u32,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // The IDF may already run the task watchdog; reconfigure it then.
        let mut rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
        if rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
            rc = unsafe { esp_idf_svc::sys::esp_task_wdt_reconfigure(&config) };
        }
        if rc != esp_idf_svc::sys::ESP_OK {
            return Err(PlatformError::Watchdog(format!(
                "esp_task_wdt_init failed with code {rc}"
            )));
        }

        let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
        if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_ARG {
            return Ok(());
        }
        Err(PlatformError::Watchdog(format!(
            "esp_task_wdt_add failed with code {rc}"
        )))
    }

    fn feed(&mut self) {
        let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
    }
}

struct BootButton(PinDriver<'static, AnyInputPin, Input>);

impl Button for BootButton {
    fn is_pressed(&mut self) -> bool {
        self.0.is_low()
    }
}
