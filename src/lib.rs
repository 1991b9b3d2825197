//! Drive a Waveshare 7.3inch Spectra 6 ePaper panel through one display cycle
//!
//! The panel driver was built using [`embedded-hal`] traits, everything around it
//! (fetching, decoding, quantizing) runs on the host.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/1.0.0
//!
//! # Requirements
//!
//! ### SPI
//!
//! - MISO is not connected/available
//! - SPI_MODE_0 is used (CPHL = 0, CPOL = 0)
//! - 8 bits per word, MSB first
//! - 4Mhz is what the vendor uses on a Raspberry Pi
//!
//! ### Other....
//!
//! - Buffersize: a frame buffer always needs to be of the size `ceil(width * bpp / 8) * height`,
//!   for the 7in3e that is `800 / 2 * 480`
//!
//! # Examples
//!
//! ```rust, no_run
//! use std::time::Duration;
//! use epd_photoframe::prelude::*;
//! # fn run<D: PanelDriver>(driver: D) -> Result<(), PipelineError> {
//!
//! let mut session = PanelSession::new(driver);
//! let source = NetworkSource::new("localhost", 3000, "/bmp", Duration::from_secs(30));
//!
//! let pipeline = Pipeline::new(PipelineOptions::default(), CancelToken::new());
//! let report = pipeline.run(&mut session, &source)?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod codec;
pub mod color;
pub mod config;
pub mod epd7in3e;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod source;

/// Interface for the physical connection between display and the controlling device
mod interface;

mod traits;

#[cfg(feature = "linux-dev")]
pub mod linux;

#[cfg(test)]
pub(crate) mod testing;

pub use traits::{PanelDriver, PanelMode};

/// Includes everything important besides the chosen panel
pub mod prelude {
    pub use crate::codec::{EncodeOptions, FrameFormat, PanelBuffer};
    pub use crate::color::{Color, ColorDepth, SpectraColor};
    pub use crate::error::{AcquireError, CodecError, HardwareError, PipelineError, SessionError};
    pub use crate::pipeline::{CancelToken, Pipeline, PipelineOptions, RetryPolicy, RunReport};
    pub use crate::session::{PanelSession, PanelState};
    pub use crate::source::{ImageSource, LocalFileSource, NetworkSource};
    pub use crate::traits::{PanelDriver, PanelMode};
    pub use crate::SPI_MODE;
}

use embedded_hal::spi::{Mode, Phase, Polarity};

/// SPI mode -
/// For more infos see [Requirements: SPI](index.html#spi)
pub const SPI_MODE: Mode = Mode {
    phase: Phase::CaptureOnFirstTransition,
    polarity: Polarity::IdleLow,
};

/// Computes the needed buffer length. Takes care of rounding up in case width
/// is not divisible by 8.
pub(crate) const fn line_bytes(width: u32, bits_per_pixel: usize) -> usize {
    // round to upper 8 bit count
    (width as usize * bits_per_pixel + 7) / 8
}
