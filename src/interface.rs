use std::time::Duration;

use embedded_hal::{
    delay::DelayNs,
    digital::{Error as _, InputPin, OutputPin},
    spi::{Error as _, SpiDevice},
};
use tracing::{debug, trace};

use crate::error::HardwareError;
use crate::traits::Command;

/// Linux has a default limit of 4096 bytes per spi transfer
/// see https://raspberrypi.stackexchange.com/questions/65595/spi-transfer-fails-with-buffer-size-greater-than-4096
const SPI_CHUNK: usize = 4096;

/// The Connection Interface of all (?) Waveshare EPD-Devices
///
/// Data blocks are written blockwise, split into [`SPI_CHUNK`] sized transfers.
pub(crate) struct DisplayInterface<SPI, BUSY, DC, RST, PWR, DELAY> {
    /// SPI
    spi: SPI,
    /// Low for busy, Wait until display is ready!
    busy: BUSY,
    /// Data/Command Control Pin (High for data, Low for command)
    dc: DC,
    /// Pin for Resetting
    rst: RST,
    /// Power enable of the HAT, only present on newer revisions
    pwr: Option<PWR>,
    /// The concrete Delay implementation
    delay: DELAY,
    /// number of ms the idle loop should sleep on
    poll_ms: u32,
    /// upper bound for a single busy wait
    busy_timeout: Duration,
}

impl<SPI, BUSY, DC, RST, PWR, DELAY> DisplayInterface<SPI, BUSY, DC, RST, PWR, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    PWR: OutputPin,
    DELAY: DelayNs,
{
    /// Creates a new `DisplayInterface` struct
    ///
    /// If no poll interval is given, a default of 10ms is used.
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
        // a zero interval would never advance the timeout bookkeeping
        let poll_ms = poll_ms.unwrap_or(10).max(1);
        DisplayInterface {
            spi,
            busy,
            dc,
            rst,
            pwr,
            delay,
            poll_ms,
            busy_timeout,
        }
    }

    /// Switches the panel supply on, if the board has a power enable line
    pub(crate) fn power_on(&mut self) -> Result<(), HardwareError> {
        if let Some(pwr) = self.pwr.as_mut() {
            pwr.set_high()
                .map_err(|e| HardwareError::PwrError(e.kind()))?;
        }
        Ok(())
    }

    /// Basic function for sending [Commands](Command).
    ///
    /// Enables direct interaction with the device with the help of [data()](DisplayInterface::data())
    pub(crate) fn cmd<T: Command>(&mut self, command: T) -> Result<(), HardwareError> {
        // low for commands
        self.dc
            .set_low()
            .map_err(|e| HardwareError::DcError(e.kind()))?;

        // Transfer the command over spi
        self.write(&[command.address()])
    }

    /// Basic function for sending an array of u8-values of data over spi
    ///
    /// Enables direct interaction with the device with the help of [cmd()](DisplayInterface::cmd())
    pub(crate) fn data(&mut self, data: &[u8]) -> Result<(), HardwareError> {
        // high for data
        self.dc
            .set_high()
            .map_err(|e| HardwareError::DcError(e.kind()))?;

        self.write(data)
    }

    /// Basic function for sending [Commands](Command) and the data belonging to it.
    pub(crate) fn cmd_with_data<T: Command>(
        &mut self,
        command: T,
        data: &[u8],
    ) -> Result<(), HardwareError> {
        self.cmd(command)?;
        self.data(data)
    }

    /// Basic function for sending the same byte of data (one u8) multiple times over spi
    pub(crate) fn data_x_times(
        &mut self,
        val: u8,
        repetitions: usize,
    ) -> Result<(), HardwareError> {
        // high for data
        self.dc
            .set_high()
            .map_err(|e| HardwareError::DcError(e.kind()))?;

        let chunk = [val; SPI_CHUNK];
        let mut remaining = repetitions;
        while remaining > 0 {
            let n = remaining.min(SPI_CHUNK);
            self.write(&chunk[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    // spi write helper/abstraction function
    fn write(&mut self, data: &[u8]) -> Result<(), HardwareError> {
        // transfer spi data
        if cfg!(target_os = "linux") {
            for data_chunk in data.chunks(SPI_CHUNK) {
                self.spi
                    .write(data_chunk)
                    .map_err(|e| HardwareError::SpiError(e.kind()))?;
            }
            Ok(())
        } else {
            self.spi
                .write(data)
                .map_err(|e| HardwareError::SpiError(e.kind()))
        }
    }

    /// Waits until device isn't busy anymore
    ///
    /// Gives up with [`HardwareError::BusyTimeout`] once the accumulated poll time
    /// reaches the configured bound.
    pub(crate) fn wait_until_idle(&mut self) -> Result<(), HardwareError> {
        let timeout_ms = self.busy_timeout.as_millis();
        let mut waited_ms: u128 = 0;
        while self.is_busy()? {
            if waited_ms >= timeout_ms {
                debug!(waited_ms, "busy line never deasserted");
                return Err(HardwareError::BusyTimeout {
                    timeout: self.busy_timeout,
                });
            }
            self.delay.delay_ms(self.poll_ms);
            waited_ms += u128::from(self.poll_ms);
        }
        trace!(waited_ms, "panel idle");
        Ok(())
    }

    /// Checks if device is still busy, the line is held low while it is
    pub(crate) fn is_busy(&mut self) -> Result<bool, HardwareError> {
        self.busy
            .is_low()
            .map_err(|e| HardwareError::BusyError(e.kind()))
    }

    /// Abstraction of setting the delay for simpler calls
    pub(crate) fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Resets the device.
    ///
    /// Often used to awake the module from deep sleep.
    ///
    /// The timing of keeping the reset pin low seems to be important and different per device.
    /// All values are in microseconds: high before the pulse, the low pulse itself, high after it.
    pub(crate) fn reset(
        &mut self,
        initial_delay: u32,
        duration: u32,
        settle: u32,
    ) -> Result<(), HardwareError> {
        self.rst
            .set_high()
            .map_err(|e| HardwareError::RstError(e.kind()))?;
        self.delay.delay_us(initial_delay);

        self.rst
            .set_low()
            .map_err(|e| HardwareError::RstError(e.kind()))?;
        self.delay.delay_us(duration);
        self.rst
            .set_high()
            .map_err(|e| HardwareError::RstError(e.kind()))?;
        self.delay.delay_us(settle);
        Ok(())
    }

    /// Drives the control lines low before the handles are dropped
    ///
    /// Errors are ignored, there is nothing left to recover at this point.
    pub(crate) fn release(&mut self) {
        let _ = self.rst.set_low();
        let _ = self.dc.set_low();
        if let Some(pwr) = self.pwr.as_mut() {
            let _ = pwr.set_low();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    #[derive(Clone, Copy)]
    struct TestCommand;

    impl Command for TestCommand {
        fn address(self) -> u8 {
            0x12
        }
    }

    type TestInterface =
        DisplayInterface<SpiMock<u8>, PinMock, PinMock, PinMock, PinMock, NoopDelay>;

    fn interface(
        spi: &SpiMock<u8>,
        busy: &PinMock,
        dc: &PinMock,
        rst: &PinMock,
        timeout_ms: u64,
    ) -> TestInterface {
        DisplayInterface::new(
            spi.clone(),
            busy.clone(),
            dc.clone(),
            rst.clone(),
            None,
            NoopDelay::new(),
            Some(5),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn cmd_with_data_toggles_dc() {
        let mut spi = SpiMock::<u8>::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x12]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0x01]),
            SpiTransaction::transaction_end(),
        ]);
        let mut busy = PinMock::new(&[]);
        let mut dc = PinMock::new(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);
        let mut rst = PinMock::new(&[]);

        let mut di = interface(&spi, &busy, &dc, &rst, 100);
        di.cmd_with_data(TestCommand, &[0x00, 0x01]).unwrap();

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn wait_until_idle_returns_once_busy_deasserts() {
        let mut spi = SpiMock::<u8>::new(&[]);
        let mut busy = PinMock::new(&[
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
            PinTransaction::get(State::High),
        ]);
        let mut dc = PinMock::new(&[]);
        let mut rst = PinMock::new(&[]);

        let mut di = interface(&spi, &busy, &dc, &rst, 100);
        assert_eq!(di.wait_until_idle(), Ok(()));

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn wait_until_idle_is_bounded() {
        let mut spi = SpiMock::<u8>::new(&[]);
        // polls at 0, 5, 10, 15 and 20 ms, the last one gives up
        let mut busy = PinMock::new(&[
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
            PinTransaction::get(State::Low),
        ]);
        let mut dc = PinMock::new(&[]);
        let mut rst = PinMock::new(&[]);

        let mut di = interface(&spi, &busy, &dc, &rst, 20);
        assert_eq!(
            di.wait_until_idle(),
            Err(HardwareError::BusyTimeout {
                timeout: Duration::from_millis(20)
            })
        );

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn data_is_one_transfer() {
        let mut spi = SpiMock::<u8>::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x21, 0x63, 0x55]),
            SpiTransaction::transaction_end(),
        ]);
        let mut busy = PinMock::new(&[PinTransaction::get(State::High)]);
        let mut dc = PinMock::new(&[PinTransaction::set(State::High)]);
        let mut rst = PinMock::new(&[]);

        let mut di = interface(&spi, &busy, &dc, &rst, 100);
        di.data(&[0x21, 0x63, 0x55]).unwrap();
        assert_eq!(di.is_busy(), Ok(false));

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }

    #[test]
    fn data_x_times_is_chunked() {
        let mut spi = SpiMock::<u8>::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x11; SPI_CHUNK]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x11; 4]),
            SpiTransaction::transaction_end(),
        ]);
        let mut busy = PinMock::new(&[]);
        let mut dc = PinMock::new(&[PinTransaction::set(State::High)]);
        let mut rst = PinMock::new(&[]);

        let mut di = interface(&spi, &busy, &dc, &rst, 100);
        di.data_x_times(0x11, SPI_CHUNK + 4).unwrap();

        spi.done();
        busy.done();
        dc.done();
        rst.done();
    }
}
