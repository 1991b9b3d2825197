//! A simple Driver for the Waveshare 7.3inch e-Paper HAT (E) Display via SPI
//!
//! Spectra 6 panel: black, white, yellow, red, blue and green at 4 bits per pixel.
//!
//! # References
//!
//! - [Datasheet](https://www.waveshare.com/wiki/7.3inch_e-Paper_HAT_(E)_Manual)
//! - [Waveshare C driver](https://github.com/waveshareteam/e-Paper/blob/master/RaspberryPi_JetsonNano/c/lib/e-Paper/EPD_7in3e.c)
//! - [Waveshare Python driver](https://github.com/waveshareteam/e-Paper/blob/master/RaspberryPi_JetsonNano/python/lib/waveshare_epd/epd7in3e.py)

use std::time::Duration;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiDevice,
};
use tracing::debug;

use crate::{
    color::{ColorDepth, SpectraColor},
    error::HardwareError,
    interface::DisplayInterface,
    traits::{PanelDriver, PanelMode},
};

use self::command::Command;

mod command;

/// Width of the display
pub const WIDTH: u32 = 800;
/// Height of the display
pub const HEIGHT: u32 = 480;
/// Resolution and color depth of the display
pub const MODE: PanelMode = PanelMode::new(WIDTH, HEIGHT, ColorDepth::Spectra6);
/// Default Background Color
pub const DEFAULT_BACKGROUND_COLOR: SpectraColor = SpectraColor::White;

type Interface<SPI, BUSY, DC, RST, PWR, DELAY> = DisplayInterface<SPI, BUSY, DC, RST, PWR, DELAY>;

/// Epd7in3e driver
pub struct Epd7in3e<SPI, BUSY, DC, RST, PWR, DELAY> {
    /// Connection Interface, `None` once the handles were released
    interface: Option<Interface<SPI, BUSY, DC, RST, PWR, DELAY>>,
}

impl<SPI, BUSY, DC, RST, PWR, DELAY> Epd7in3e<SPI, BUSY, DC, RST, PWR, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    PWR: OutputPin,
    DELAY: DelayNs,
{
    /// Creates a new driver from a SPI device, Busy InputPin, DC, RST and the optional power enable pin
    ///
    /// Unlike most drivers this does not initialise the device yet, that is left to
    /// [`PanelDriver::init`].
    ///
    /// `poll_ms` is the number of ms the idle loop should sleep on, `None` means a default value is used.
    /// `busy_timeout` bounds every single wait for the busy line.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spi: SPI,
        busy: BUSY,
        dc: DC,
        rst: RST,
        pwr: Option<PWR>,
        delay: DELAY,
        poll_ms: Option<u32>,
        busy_timeout: Duration,
    ) -> Self {
        let interface =
            DisplayInterface::new(spi, busy, dc, rst, pwr, delay, poll_ms, busy_timeout);
        Epd7in3e {
            interface: Some(interface),
        }
    }

    fn interface(
        &mut self,
    ) -> Result<&mut Interface<SPI, BUSY, DC, RST, PWR, DELAY>, HardwareError> {
        self.interface.as_mut().ok_or(HardwareError::Released)
    }

    /// Powers the booster up, refreshes from SRAM and powers down again
    fn display_frame(&mut self) -> Result<(), HardwareError> {
        let di = self.interface()?;
        di.cmd(Command::PowerOn)?;
        di.wait_until_idle()?;

        di.cmd_with_data(Command::BoosterSoftStart2, &[0x6F, 0x1F, 0x17, 0x49])?;

        di.cmd_with_data(Command::DisplayRefresh, &[0x00])?;
        di.wait_until_idle()?;

        di.cmd_with_data(Command::PowerOff, &[0x00])?;
        di.wait_until_idle()
    }
}

impl<SPI, BUSY, DC, RST, PWR, DELAY> PanelDriver for Epd7in3e<SPI, BUSY, DC, RST, PWR, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    PWR: OutputPin,
    DELAY: DelayNs,
{
    fn mode(&self) -> PanelMode {
        MODE
    }

    fn init(&mut self) -> Result<(), HardwareError> {
        let di = self.interface()?;
        di.power_on()?;
        di.reset(20_000, 2_000, 20_000)?;
        di.wait_until_idle()?;
        di.delay_ms(30);

        di.cmd_with_data(Command::CMDH, &[0x49, 0x55, 0x20, 0x08, 0x09, 0x18])?;
        di.cmd_with_data(Command::PowerSetting, &[0x3F])?;
        di.cmd_with_data(Command::PanelSetting, &[0x5F, 0x69])?;
        di.cmd_with_data(Command::PowerOffSequence, &[0x00, 0x54, 0x00, 0x44])?;
        di.cmd_with_data(Command::BoosterSoftStart1, &[0x40, 0x1F, 0x1F, 0x2C])?;
        di.cmd_with_data(Command::BoosterSoftStart2, &[0x6F, 0x1F, 0x17, 0x49])?;
        di.cmd_with_data(Command::BoosterSoftStart3, &[0x6F, 0x1F, 0x1F, 0x22])?;
        di.cmd_with_data(Command::PllControl, &[0x03])?;
        di.cmd_with_data(Command::VcomDataInterval, &[0x3F])?;
        di.cmd_with_data(Command::TconSetting, &[0x02, 0x00])?;
        di.cmd_with_data(Command::ResolutionSetting, &[0x03, 0x20, 0x01, 0xE0])?;
        di.cmd_with_data(Command::PowerSaving, &[0x01])?;
        di.cmd_with_data(Command::OxE3, &[0x2F])?;

        di.cmd(Command::PowerOn)?;
        di.wait_until_idle()?;
        debug!("epd7in3e initialised");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        let bg = SpectraColor::colors_byte(DEFAULT_BACKGROUND_COLOR, DEFAULT_BACKGROUND_COLOR);

        let di = self.interface()?;
        di.cmd(Command::DataStartTransmission)?;
        di.data_x_times(bg, MODE.buffer_len())?;

        self.display_frame()
    }

    fn display(&mut self, buffer: &[u8]) -> Result<(), HardwareError> {
        let di = self.interface()?;
        di.cmd_with_data(Command::DataStartTransmission, buffer)?;

        self.display_frame()
    }

    fn sleep(&mut self) -> Result<(), HardwareError> {
        let di = self.interface()?;
        di.cmd_with_data(Command::DeepSleep, &[0xA5])?;
        // the controller needs this long before the supply may be cut
        di.delay_ms(2_000);
        Ok(())
    }

    fn shutdown(&mut self, cleanup: bool) {
        if let Some(mut di) = self.interface.take() {
            if cleanup {
                di.release();
            }
            debug!(cleanup, "epd7in3e handles released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    type TestEpd = Epd7in3e<SpiMock<u8>, PinMock, PinMock, PinMock, PinMock, NoopDelay>;

    fn epd(spi: &SpiMock<u8>, busy: &PinMock, dc: &PinMock, rst: &PinMock) -> TestEpd {
        Epd7in3e::new(
            spi.clone(),
            busy.clone(),
            dc.clone(),
            rst.clone(),
            None,
            NoopDelay::new(),
            None,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn epd_size() {
        assert_eq!(WIDTH, 800);
        assert_eq!(HEIGHT, 480);
        assert_eq!(MODE.buffer_len(), 192_000);
        assert_eq!(DEFAULT_BACKGROUND_COLOR, SpectraColor::White);
    }

    #[test]
    fn sleep_sends_deep_sleep_check_code() {
        let mut spi = SpiMock::<u8>::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x07]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0xA5]),
            SpiTransaction::transaction_end(),
        ]);
        let mut busy = PinMock::new(&[]);
        let mut dc = PinMock::new(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);
        let mut rst = PinMock::new(&[]);

        let mut epd = epd(&spi, &busy, &dc, &rst);
        epd.sleep().unwrap();

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn shutdown_releases_once() {
        let mut spi = SpiMock::<u8>::new(&[]);
        let mut busy = PinMock::new(&[]);
        // only the first shutdown drives the lines low
        let mut dc = PinMock::new(&[PinTransaction::set(State::Low)]);
        let mut rst = PinMock::new(&[PinTransaction::set(State::Low)]);

        let mut epd = epd(&spi, &busy, &dc, &rst);
        epd.shutdown(true);
        epd.shutdown(true);
        assert_eq!(epd.init(), Err(HardwareError::Released));
        assert_eq!(epd.display(&[0x11; 4]), Err(HardwareError::Released));

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn shutdown_without_cleanup_leaves_lines_alone() {
        let mut spi = SpiMock::<u8>::new(&[]);
        let mut busy = PinMock::new(&[]);
        let mut dc = PinMock::new(&[]);
        let mut rst = PinMock::new(&[]);

        let mut epd = epd(&spi, &busy, &dc, &rst);
        epd.shutdown(false);
        assert_eq!(epd.sleep(), Err(HardwareError::Released));

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }
}
