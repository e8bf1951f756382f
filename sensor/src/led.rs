use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::TransmitConfig, FixedLengthSignal, PinState, Pulse, PulseTicks, RmtChannel,
        TxRmtDriver,
    },
};
use log::warn;

use airnode_common::{Color, StatusLight};

// 80 MHz APB / 2 gives 25 ns ticks.
const RMT_CLOCK_DIVIDER: u8 = 2;
const T0H_TICKS: u16 = 16;
const T0L_TICKS: u16 = 34;
const T1H_TICKS: u16 = 32;
const T1L_TICKS: u16 = 18;

pub struct Ws2812 {
    tx: TxRmtDriver<'static>,
    zero: (Pulse, Pulse),
    one: (Pulse, Pulse),
}

impl Ws2812 {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let config = TransmitConfig::new()
            .clock_divider(RMT_CLOCK_DIVIDER)
            .idle(Some(PinState::Low));
        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT LED driver")?;

        Ok(Self {
            tx,
            zero: bit(T0H_TICKS, T0L_TICKS)?,
            one: bit(T1H_TICKS, T1L_TICKS)?,
        })
    }

    fn write(&mut self, color: Color) -> anyhow::Result<()> {
        let grb = (u32::from(color.g) << 16) | (u32::from(color.r) << 8) | u32::from(color.b);

        let mut signal = FixedLengthSignal::<24>::new();
        for index in 0..24 {
            let pulses = if grb & (1 << (23 - index)) != 0 {
                &self.one
            } else {
                &self.zero
            };
            signal
                .set(index, pulses)
                .context("failed to build LED frame")?;
        }

        self.tx
            .start_blocking(&signal)
            .context("failed to transmit LED frame over RMT")
    }
}

fn bit(high: u16, low: u16) -> anyhow::Result<(Pulse, Pulse)> {
    Ok((
        Pulse::new(PinState::High, PulseTicks::new(high).context("invalid LED pulse")?),
        Pulse::new(PinState::Low, PulseTicks::new(low).context("invalid LED pulse")?),
    ))
}

impl StatusLight for Ws2812 {
    fn show(&mut self, color: Color) {
        if let Err(err) = self.write(color) {
            warn!("status light update failed: {err:#}");
        }
    }
}
