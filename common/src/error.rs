use std::{error::Error as StdError, fmt, io};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to connect to {host}:{port}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("unsupported response feature: {0}")]
    UnsupportedFeature(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection i/o failed")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("hub rejected state update with status {status}: {}", String::from_utf8_lossy(.body))]
    Rejected { status: u16, body: Vec<u8> },
    #[error("failed to encode state payload")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("i2c transfer failed: {0}")]
    Bus(embedded_hal::i2c::ErrorKind),
    #[error("checksum mismatch")]
    Checksum,
    #[error("device not ready")]
    NotReady,
    #[error("device not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration")]
    Parse(#[from] serde_json::Error),
    #[error("configuration store failed: {0}")]
    Store(String),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("watchdog: {0}")]
    Watchdog(String),
    #[error("network: {0}")]
    Network(String),
    #[error("i2c bus: {0}")]
    Bus(String),
}

#[derive(Debug, Error)]
pub enum Fault {
    #[error("configuration unavailable")]
    Config(#[from] ConfigError),
    #[error("platform bring-up failed")]
    Platform(#[from] PlatformError),
    #[error("sensor `{sensor}` failed")]
    Sensor {
        sensor: &'static str,
        #[source]
        source: SensorError,
    },
    #[error("submitting `{entity}` failed")]
    Report {
        entity: &'static str,
        #[source]
        source: ReportError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Config,
    Platform,
    Sensor,
    Connection,
    Protocol,
    UnsupportedFeature,
    Timeout,
    ReportRejected,
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Config(_) => FaultKind::Config,
            Self::Platform(_) => FaultKind::Platform,
            Self::Sensor { .. } => FaultKind::Sensor,
            Self::Report { source, .. } => match source {
                ReportError::Rejected { .. } => FaultKind::ReportRejected,
                ReportError::Encode(_) => FaultKind::Protocol,
                ReportError::Http(http) => match http {
                    HttpError::Connection { .. } | HttpError::Io(_) => FaultKind::Connection,
                    HttpError::Protocol(_) => FaultKind::Protocol,
                    HttpError::UnsupportedFeature(_) => FaultKind::UnsupportedFeature,
                    HttpError::Timeout => FaultKind::Timeout,
                },
            },
        }
    }

    /// Renders the error with all of its sources, outermost first.
    pub fn chain(&self) -> Chain<'_> {
        Chain(self)
    }
}

pub struct Chain<'a>(&'a (dyn StdError + 'static));

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
