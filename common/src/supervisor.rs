use std::{convert::Infallible, time::Duration};

use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    config::{NodeConfig, TimingConfig},
    error::Fault,
    http::HttpClient,
    hub::HomeAssistant,
    indicator::StatusIndicator,
    platform::{Bringup, Button, StatusLight, Watchdog},
    sensors::SensorSet,
    transport::Connector,
    types::{BootStage, Color},
};

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(15_000);
const GRACE_MARGIN: Duration = Duration::from_secs(1);

/// How a supervisor run ended. The caller owns the actual reset.
#[derive(Debug)]
pub enum Exit {
    SafeMode,
    Reboot(Fault),
    // Boot failed with the watchdog armed; it will reset the device.
    Stalled(Fault),
}

pub struct Supervisor<W, L, B> {
    watchdog: W,
    indicator: StatusIndicator<L>,
    button: B,
    watchdog_timeout: Duration,
    stage: BootStage,
}

impl<W, L, B> Supervisor<W, L, B>
where
    W: Watchdog,
    L: StatusLight,
    B: Button,
{
    pub fn new(watchdog: W, light: L, button: B) -> Self {
        Self {
            watchdog,
            indicator: StatusIndicator::new(light),
            button,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            stage: BootStage::Idle,
        }
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub async fn run<P, C>(mut self, board: &mut P, connector: C) -> Exit
    where
        P: Bringup,
        C: Connector,
    {
        if self.button.is_pressed() {
            warn!("button held at power-on, entering safe mode");
            return Exit::SafeMode;
        }

        if let Err(err) = self.watchdog.arm(self.watchdog_timeout) {
            return self
                .fail(err.into(), TimingConfig::default().fault_grace())
                .await;
        }
        info!("watchdog armed, timeout {:?}", self.watchdog_timeout);

        let (config, mut sensors) = match self.boot(board).await {
            Ok(booted) => booted,
            Err(fault) => {
                self.indicator.show(Color::ERROR);
                error!(
                    stage = self.stage.as_str(),
                    kind = ?fault.kind(),
                    "boot failed: {}",
                    fault.chain()
                );
                return Exit::Stalled(fault);
            }
        };

        self.indicator.show(Color::OFF);
        self.advance(BootStage::Running);

        let timeout = config.timing.http_timeout();
        let client = HttpClient::new(connector).with_timeout(timeout);
        let reporter = HomeAssistant::new(config.hub(), client);
        let fault = self.run_tasks(&config.timing, &mut sensors, &reporter).await;

        self.fail(fault, config.timing.fault_grace()).await
    }

    async fn boot<P: Bringup>(&mut self, board: &mut P) -> Result<(NodeConfig, SensorSet), Fault> {
        self.indicator.show(Color::LOADING_CONFIG);
        let config = board.load_config()?;
        self.advance(BootStage::ConfigLoaded);

        self.indicator.show(Color::CONNECTING);
        info!("joining network `{}`", config.wifi_ssid);
        board.start_network(&config)?;
        let poll = config.timing.readiness_poll();
        while !board.network_ready() {
            sleep(poll).await;
        }
        self.advance(BootStage::NetworkReady);

        self.indicator.show(Color::WAITING_DEVICES);
        loop {
            let missing = board.missing_devices()?;
            if missing.is_empty() {
                break;
            }
            debug!("waiting for bus devices {missing:02x?}");
            sleep(poll).await;
        }

        let mut sensors = board.init_sensors()?;
        sensors.start()?;
        info!("sensors ready: {}", sensors.names().join(", "));
        self.advance(BootStage::DevicesReady);

        Ok((config, sensors))
    }

    async fn run_tasks<C: Connector>(
        &mut self,
        timing: &TimingConfig,
        sensors: &mut SensorSet,
        reporter: &HomeAssistant<C>,
    ) -> Fault {
        let feed_every = timing
            .watchdog_feed_interval()
            .min(self.watchdog_timeout / 3);
        let Self {
            watchdog,
            indicator,
            button,
            ..
        } = self;

        tokio::select! {
            fault = measurement_cycle(sensors, reporter, timing.measurement_period()) => fault,
            never = feed_watchdog(watchdog, feed_every) => match never {},
            never = watch_button(indicator, button, timing.liveness_interval()) => match never {},
        }
    }

    async fn fail(&mut self, fault: Fault, grace: Duration) -> Exit {
        self.indicator.show(Color::ERROR);
        self.indicator.set_busy(false);
        error!(kind = ?fault.kind(), "{}", fault.chain());

        // The reset has to happen here, before the watchdog fires.
        self.watchdog.feed();
        let limit = self.watchdog_timeout.saturating_sub(GRACE_MARGIN);
        let grace = grace.min(limit);
        warn!("resetting in {} seconds", grace.as_secs());
        sleep(grace).await;
        Exit::Reboot(fault)
    }

    fn advance(&mut self, stage: BootStage) {
        self.stage = stage;
        info!("boot stage: {}", stage.as_str());
    }
}

/// Time left in the current period; zero once a cycle has overrun.
pub fn next_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

pub async fn measure_and_report<C: Connector>(
    sensors: &mut SensorSet,
    reporter: &HomeAssistant<C>,
) -> Result<usize, Fault> {
    let readings = sensors.measure_all()?;
    for reading in &readings {
        reporter
            .submit(reading)
            .await
            .map_err(|source| Fault::Report {
                entity: reading.quantity.name,
                source,
            })?;
    }
    Ok(readings.len())
}

pub async fn measurement_cycle<C: Connector>(
    sensors: &mut SensorSet,
    reporter: &HomeAssistant<C>,
    period: Duration,
) -> Fault {
    loop {
        let started = Instant::now();
        match measure_and_report(sensors, reporter).await {
            Ok(count) => debug!("reported {count} readings in {:?}", started.elapsed()),
            Err(fault) => return fault,
        }

        let delay = next_delay(period, started.elapsed());
        if delay.is_zero() {
            warn!("measurement cycle overran its {period:?} period");
            tokio::task::yield_now().await;
        } else {
            sleep(delay).await;
        }
    }
}

async fn feed_watchdog<W: Watchdog>(watchdog: &mut W, every: Duration) -> Infallible {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        watchdog.feed();
    }
}

async fn watch_button<L: StatusLight, B: Button>(
    indicator: &mut StatusIndicator<L>,
    button: &mut B,
    every: Duration,
) -> Infallible {
    loop {
        indicator.set_busy(button.is_pressed());
        sleep(every).await;
    }
}
