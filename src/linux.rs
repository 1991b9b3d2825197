//! Opens the panel on an embedded Linux host (spidev + GPIO character device)
//!
//! Enable SPI in raspi-config first. The GPIO lines are requested through
//! `/dev/gpiochip*`, so no sysfs export and no root is needed when the user is in
//! the `gpio` and `spi` groups.

use std::path::PathBuf;
use std::time::Duration;

use linux_embedded_hal::{
    gpio_cdev::{Chip, LineRequestFlags},
    spidev::{SpiModeFlags, SpidevOptions},
    CdevPin, Delay, SpidevDevice,
};
use thiserror::Error;
use tracing::debug;

use crate::config::{PanelConfig, PinConfig};
use crate::epd7in3e::Epd7in3e;

/// The 7.3inch panel wired to a Raspberry Pi
pub type LinuxEpd = Epd7in3e<SpidevDevice, CdevPin, CdevPin, CdevPin, CdevPin, Delay>;

const CONSUMER: &str = "epd-photoframe";

/// Errors while claiming the hardware
#[derive(Debug, Error)]
pub enum SetupError {
    /// The spidev node could not be opened or configured
    #[error("failed to set up spi device {}: {reason}", device.display())]
    Spi {
        /// spidev node
        device: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// A GPIO line could not be claimed
    #[error("failed to claim gpio line {line} ({name}): {reason}")]
    Gpio {
        /// Role of the line
        name: &'static str,
        /// BCM line number
        line: u32,
        /// What went wrong
        reason: String,
    },
    /// The GPIO chip could not be opened
    #[error("failed to open {}: {reason}", chip.display())]
    Chip {
        /// Character device
        chip: PathBuf,
        /// What went wrong
        reason: String,
    },
}

/// Claims SPI and GPIO and builds an uninitialised driver
pub fn open_panel(pins: &PinConfig, panel: &PanelConfig) -> Result<LinuxEpd, SetupError> {
    let spi_error = |reason: String| SetupError::Spi {
        device: pins.spi_device.clone(),
        reason,
    };
    let mut spi =
        SpidevDevice::open(&pins.spi_device).map_err(|e| spi_error(e.to_string()))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(pins.spi_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options)
        .map_err(|e| spi_error(e.to_string()))?;

    let mut chip = Chip::new(&pins.gpiochip).map_err(|e| SetupError::Chip {
        chip: pins.gpiochip.clone(),
        reason: e.to_string(),
    })?;

    let busy = request(&mut chip, "busy", pins.busy, LineRequestFlags::INPUT)?;
    let dc = request(&mut chip, "dc", pins.dc, LineRequestFlags::OUTPUT)?;
    let rst = request(&mut chip, "rst", pins.rst, LineRequestFlags::OUTPUT)?;
    let pwr = if pins.power_enable {
        Some(request(&mut chip, "pwr", pins.pwr, LineRequestFlags::OUTPUT)?)
    } else {
        None
    };
    debug!(?pins, "panel hardware claimed");

    Ok(Epd7in3e::new(
        spi,
        busy,
        dc,
        rst,
        pwr,
        Delay {},
        Some(panel.poll_ms),
        Duration::from_secs(panel.busy_timeout_secs),
    ))
}

fn request(
    chip: &mut Chip,
    name: &'static str,
    line: u32,
    flags: LineRequestFlags,
) -> Result<CdevPin, SetupError> {
    let gpio_error = |reason: String| SetupError::Gpio { name, line, reason };
    let handle = chip
        .get_line(line)
        .and_then(|l| l.request(flags, 0, CONSUMER))
        .map_err(|e| gpio_error(e.to_string()))?;
    CdevPin::new(handle).map_err(|e| gpio_error(e.to_string()))
}
