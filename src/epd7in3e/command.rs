//! SPI Commands for the Waveshare 7.3" Spectra 6 E-Ink Display

use crate::traits;

/// Epd7in3e commands
///
/// Most register names are not published, the raw address is used for those.
#[allow(dead_code, clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug)]
pub(crate) enum Command {
    /// Panel setting
    PanelSetting = 0x00,
    /// Power setting
    PowerSetting = 0x01,

    PowerOff = 0x02,

    /// Power off sequence setting
    PowerOffSequence = 0x03,

    PowerOn = 0x04,

    /// Booster soft start, phase 1
    BoosterSoftStart1 = 0x05,
    /// Booster soft start, phase 2. Written again before every refresh.
    BoosterSoftStart2 = 0x06,

    DeepSleep = 0x07,

    /// Booster soft start, phase 3
    BoosterSoftStart3 = 0x08,

    DataStartTransmission = 0x10,

    DisplayRefresh = 0x12,

    /// PLL control (frame rate)
    PllControl = 0x30,

    /// VCOM and data interval setting
    VcomDataInterval = 0x50,

    /// TCON setting
    TconSetting = 0x60,

    /// Resolution setting
    ResolutionSetting = 0x61,

    /// Auto power saving
    PowerSaving = 0x84,

    /// Command header, unlocks the vendor registers
    CMDH = 0xAA,

    OxE3 = 0xE3,
}

impl traits::Command for Command {
    /// Returns the address of the command
    fn address(self) -> u8 {
        self as u8
    }
}
