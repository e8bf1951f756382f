pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod indicator;
pub mod platform;
pub mod sensors;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::{HubConfig, NodeConfig, TimingConfig};
pub use error::{
    ConfigError, Fault, FaultKind, HttpError, PlatformError, ReportError, SensorError,
};
pub use hub::HomeAssistant;
pub use platform::{Bringup, Button, StatusLight, Watchdog};
pub use sensors::{SensorDriver, SensorSet};
pub use supervisor::{Exit, Supervisor};
pub use transport::{Connector, TcpConnector};
pub use types::{BootStage, Color, Quantity, Reading};
