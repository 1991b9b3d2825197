use crate::color::ColorDepth;
use crate::error::HardwareError;

/// All commands need to have this trait which gives the address of the command
/// which needs to be send via SPI with activated CommandsPin (Data/Command Pin in CommandMode)
pub(crate) trait Command: Copy {
    fn address(self) -> u8;
}

/// Resolution and color depth of a panel
///
/// Together they fully determine the size and bit layout of a panel buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PanelMode {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color depth mode
    pub depth: ColorDepth,
}

impl PanelMode {
    /// Creates a new mode
    pub const fn new(width: u32, height: u32, depth: ColorDepth) -> Self {
        PanelMode {
            width,
            height,
            depth,
        }
    }

    /// Number of bytes of one buffer row, rows are padded to whole bytes
    pub const fn line_bytes(&self) -> usize {
        crate::line_bytes(self.width, self.depth.bits_per_pixel())
    }

    /// Exact number of bytes a full frame buffer has
    pub const fn buffer_len(&self) -> usize {
        self.line_bytes() * self.height as usize
    }
}

/// The hardware control interface of one physical panel
///
/// Every operation blocks until the controller reports it is no longer busy.
/// Implementations own the SPI device and the GPIO lines.
pub trait PanelDriver {
    /// Resolution and color depth the controller expects
    fn mode(&self) -> PanelMode;

    /// Power rails, reset pulse and register configuration
    fn init(&mut self) -> Result<(), HardwareError>;

    /// Writes a blank frame and refreshes the panel
    fn clear(&mut self) -> Result<(), HardwareError>;

    /// Transmits a full frame and refreshes the panel
    ///
    /// `buffer` must be exactly [`PanelMode::buffer_len`] bytes.
    fn display(&mut self, buffer: &[u8]) -> Result<(), HardwareError>;

    /// Let the device enter deep-sleep mode to save power.
    ///
    /// The deep sleep mode returns to standby with a hardware reset.
    fn sleep(&mut self) -> Result<(), HardwareError>;

    /// Gives back the SPI and GPIO handles
    ///
    /// With `cleanup` the control lines are driven low first. Must not fail and
    /// must be harmless to call again.
    fn shutdown(&mut self, cleanup: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_len_spectra6() {
        let mode = PanelMode::new(800, 480, ColorDepth::Spectra6);
        assert_eq!(mode.line_bytes(), 400);
        assert_eq!(mode.buffer_len(), 800 * 480 / 2);
    }

    #[test]
    fn buffer_len_pads_rows() {
        let mode = PanelMode::new(3, 2, ColorDepth::Spectra6);
        assert_eq!(mode.buffer_len(), 4);
        let mode = PanelMode::new(122, 250, ColorDepth::Mono);
        assert_eq!(mode.line_bytes(), 16);
        assert_eq!(mode.buffer_len(), 4000);
    }
}
