use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use airnode_common::{
    platform::missing_from_scan,
    sensors::{bh1750, sgp30, sht30, Environment},
    types::{ECO2, HUMIDITY, LIGHT, PRESSURE, TEMPERATURE, TEMPERATURE_ALT, TVOC},
    Bringup, Button, Color, ConfigError, Exit, Fault, NodeConfig, PlatformError, Quantity,
    Reading, SensorDriver, SensorError, SensorSet, StatusLight, Supervisor, TcpConnector,
    Watchdog,
};

const DEFAULT_CONFIG_PATH: &str = "config.json";
const REQUIRED_DEVICES: [u8; 3] = [
    bh1750::DEFAULT_ADDRESS,
    sht30::DEFAULT_ADDRESS,
    sgp30::DEFAULT_ADDRESS,
];

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("AIRNODE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut board = SimulatedBoard::new(config_path);
    let supervisor = Supervisor::new(ProcessWatchdog::default(), LogLight, EnvButton);

    match supervisor.run(&mut board, TcpConnector::new()).await {
        Exit::SafeMode => {
            info!("safe mode, supervisor not started");
            Ok(())
        }
        Exit::Reboot(fault) => Err(anyhow::Error::new(fault).context("node requested a reset")),
        Exit::Stalled(_) => {
            warn!("boot stalled, waiting for the watchdog");
            std::future::pending().await
        }
    }
}

struct SimulatedBoard {
    config_path: PathBuf,
}

impl SimulatedBoard {
    fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

impl Bringup for SimulatedBoard {
    fn load_config(&mut self) -> Result<NodeConfig, ConfigError> {
        let mut config = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let path = self.config_path.display();
                warn!("{path} not found, using defaults");
                NodeConfig::default()
            }
            Err(err) => return Err(err.into()),
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        config.timing.sanitize();
        Ok(config)
    }

    fn start_network(&mut self, config: &NodeConfig) -> Result<(), PlatformError> {
        info!(
            "host network in use, hub at {}:{}",
            config.ha_host, config.ha_port
        );
        Ok(())
    }

    fn network_ready(&mut self) -> bool {
        true
    }

    fn missing_devices(&mut self) -> Result<Vec<u8>, PlatformError> {
        Ok(missing_from_scan(&REQUIRED_DEVICES, &REQUIRED_DEVICES))
    }

    fn init_sensors(&mut self) -> Result<SensorSet, Fault> {
        Ok(SensorSet::new(vec![
            Box::new(Synthetic::new("light", vec![(LIGHT, 320.0, 80.0)])),
            Box::new(Synthetic::new(
                "climate",
                vec![(TEMPERATURE, 21.5, 1.5), (HUMIDITY, 45.0, 6.0)],
            )),
            Box::new(SyntheticAir::default()),
            Box::new(Synthetic::new(
                "barometer",
                vec![
                    (TEMPERATURE_ALT, 22.0, 1.0),
                    (PRESSURE, 101_325.0, 150.0),
                ],
            )),
        ]))
    }
}

fn apply_overrides(
    config: &mut NodeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(host) = lookup("AIRNODE_HA_HOST") {
        config.ha_host = host;
    }
    if let Some(port) = lookup("AIRNODE_HA_PORT") {
        config.ha_port = port
            .parse()
            .map_err(|_| ConfigError::Invalid("AIRNODE_HA_PORT is not a port number"))?;
    }
    if let Some(ssl) = lookup("AIRNODE_HA_SSL") {
        config.ha_ssl = matches!(ssl.as_str(), "1" | "true" | "yes");
    }
    if let Some(token) = lookup("AIRNODE_HA_TOKEN") {
        config.ha_token = Some(token);
    }
    if let Some(period) = lookup("AIRNODE_PERIOD_MS") {
        config.timing.measurement_period_ms = period
            .parse()
            .map_err(|_| ConfigError::Invalid("AIRNODE_PERIOD_MS is not a number"))?;
    }
    Ok(())
}

struct Synthetic {
    name: &'static str,
    channels: Vec<(Quantity, f32, f32)>,
    tick: u32,
}

impl Synthetic {
    fn new(name: &'static str, channels: Vec<(Quantity, f32, f32)>) -> Self {
        Self {
            name,
            channels,
            tick: 0,
        }
    }
}

impl SensorDriver for Synthetic {
    fn name(&self) -> &'static str {
        self.name
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError> {
        self.tick = self.tick.wrapping_add(1);
        let phase = (self.tick as f32 * 0.1).sin();
        Ok(self
            .channels
            .iter()
            .map(|(quantity, base, swing)| Reading::new(*quantity, base + swing * phase))
            .collect())
    }
}

#[derive(Default)]
struct SyntheticAir {
    absolute_humidity: f32,
}

impl SensorDriver for SyntheticAir {
    fn name(&self) -> &'static str {
        "air"
    }

    fn compensate(&mut self, environment: &Environment) -> Result<(), SensorError> {
        if let (Some(temperature), Some(humidity)) =
            (environment.temperature_c, environment.relative_humidity)
        {
            self.absolute_humidity = sgp30::absolute_humidity(temperature, humidity);
        }
        Ok(())
    }

    fn measure(&mut self) -> Result<Vec<Reading>, SensorError> {
        Ok(vec![
            Reading::new(ECO2, 400.0 + self.absolute_humidity * 4.0),
            Reading::new(TVOC, self.absolute_humidity.round()),
        ])
    }
}

/// Exits the process when not fed in time, as the hardware timer would reset
/// the chip.
#[derive(Default)]
struct ProcessWatchdog {
    last_feed_ms: Arc<AtomicU64>,
    origin: Option<Instant>,
}

impl ProcessWatchdog {
    fn now_ms(&self) -> u64 {
        self.origin
            .map(|origin| origin.elapsed().as_millis() as u64)
            .unwrap_or_default()
    }
}

impl Watchdog for ProcessWatchdog {
    fn arm(&mut self, timeout: Duration) -> Result<(), PlatformError> {
        let origin = Instant::now();
        self.origin = Some(origin);
        self.last_feed_ms.store(0, Ordering::Relaxed);

        let last_feed_ms = self.last_feed_ms.clone();
        let timeout_ms = timeout.as_millis() as u64;
        thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || loop {
                thread::sleep(Duration::from_millis(100));
                let now = origin.elapsed().as_millis() as u64;
                if now.saturating_sub(last_feed_ms.load(Ordering::Relaxed)) > timeout_ms {
                    error!("watchdog expired after {timeout_ms} ms");
                    std::process::exit(3);
                }
            })
            .map_err(|err| PlatformError::Watchdog(err.to_string()))?;
        Ok(())
    }

    fn feed(&mut self) {
        let now = self.now_ms();
        self.last_feed_ms.store(now, Ordering::Relaxed);
    }
}

struct LogLight;

impl StatusLight for LogLight {
    fn show(&mut self, color: Color) {
        info!("status light #{:02x}{:02x}{:02x}", color.r, color.g, color.b);
    }
}

struct EnvButton;

impl Button for EnvButton {
    fn is_pressed(&mut self) -> bool {
        std::env::var_os("AIRNODE_SAFE_MODE").is_some()
    }
}
