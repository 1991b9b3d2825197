//! Converts source images into the byte layout the panel controller expects
//!
//! Pipeline: decode, orient, center-crop to the native resolution, flatten alpha onto
//! white, optionally dither, map every pixel to the nearest palette color and pack the
//! color codes row-major, MSB first.

use std::io::Cursor;

use bit_field::BitField;
use image::imageops::{self, ColorMap, FilterType};
use image::metadata::Orientation;
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageReader, Rgb, RgbImage, RgbaImage,
};
use serde::Deserialize;
use tracing::debug;

use crate::color::ColorDepth;
use crate::error::CodecError;
use crate::traits::PanelMode;

/// What the acquired bytes contain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// Any image file (BMP, PNG, JPEG, GIF, WebP)
    #[default]
    Image,
    /// Bytes already packed for the panel, passed through after validation
    Packed,
}

/// How [`encode`] should treat its input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Target panel
    pub mode: PanelMode,
    /// Input format
    pub format: FrameFormat,
    /// Floyd-Steinberg error diffusion before quantizing
    pub dither: bool,
}

impl EncodeOptions {
    /// Plain nearest-color conversion of image files for `mode`
    pub fn new(mode: PanelMode) -> Self {
        EncodeOptions {
            mode,
            format: FrameFormat::Image,
            dither: false,
        }
    }
}

/// A frame in the panel's native layout
///
/// The length always matches [`PanelMode::buffer_len`] of the mode it was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelBuffer {
    mode: PanelMode,
    bytes: Vec<u8>,
}

impl PanelBuffer {
    /// Wraps `bytes`, rejecting anything that is not exactly one frame long
    pub fn new(mode: PanelMode, bytes: Vec<u8>) -> Result<Self, CodecError> {
        let expected = mode.buffer_len();
        if bytes.len() != expected {
            return Err(CodecError::BufferSize {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(PanelBuffer { mode, bytes })
    }

    /// The mode the buffer was packed for
    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    /// Raw bytes, ready for transmission
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer and returns the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero sized panel only
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Color code of the pixel at (x, y), `None` outside the panel
    pub fn code_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.mode.width || y >= self.mode.height {
            return None;
        }
        Some(self.code(x, y))
    }

    fn code(&self, x: u32, y: u32) -> u8 {
        let (index, bits) = locate(self.mode, x, y);
        self.bytes[index].get_bits(bits)
    }
}

/// Byte index and bit range of pixel (x, y), leftmost pixel in the highest bits
fn locate(mode: PanelMode, x: u32, y: u32) -> (usize, core::ops::Range<usize>) {
    let bpp = mode.depth.bits_per_pixel();
    let bit = x as usize * bpp;
    let index = y as usize * mode.line_bytes() + bit / 8;
    let shift = 8 - bpp - bit % 8;
    (index, shift..shift + bpp)
}

/// Converts the acquired bytes into a panel buffer
pub fn encode(bytes: &[u8], options: &EncodeOptions) -> Result<PanelBuffer, CodecError> {
    match options.format {
        FrameFormat::Image => {
            let image = decode(bytes)?;
            Ok(encode_image(image, options.mode, options.dither))
        }
        FrameFormat::Packed => from_packed(bytes, options.mode),
    }
}

/// Decodes any supported image format and applies its EXIF orientation
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    let unsupported = |e: &dyn std::fmt::Display| CodecError::UnsupportedFormat(e.to_string());
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| unsupported(&e))?
        .into_decoder()
        .map_err(|e| unsupported(&e))?;
    let orientation = decoder.orientation().map_err(|e| unsupported(&e))?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(|e| unsupported(&e))?;
    if orientation != Orientation::NoTransforms {
        debug!(?orientation, "applying exif orientation");
        image.apply_orientation(orientation);
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CodecError::UnsupportedFormat(format!(
            "image has no pixels ({width}x{height})"
        )));
    }
    debug!(width, height, "decoded source image");
    Ok(image)
}

/// Fits, quantizes and packs an already decoded image
pub fn encode_image(image: DynamicImage, mode: PanelMode, dither: bool) -> PanelBuffer {
    let mut rgb = flatten(&fit(image, mode));
    if dither {
        imageops::dither(&mut rgb, &PaletteMap(mode.depth));
    }
    pack(&rgb, mode)
}

/// Validates a frame that was packed elsewhere
pub fn from_packed(bytes: &[u8], mode: PanelMode) -> Result<PanelBuffer, CodecError> {
    let buffer = PanelBuffer::new(mode, bytes.to_vec())?;
    for y in 0..mode.height {
        for x in 0..mode.width {
            let code = buffer.code(x, y);
            if mode.depth.rgb_of(code).is_none() {
                return Err(CodecError::UnsupportedFormat(format!(
                    "color code {code:#x} at ({x}, {y}) is not displayable"
                )));
            }
        }
    }
    Ok(buffer)
}

/// Unpacks a buffer into the palette colors it will show
pub fn render_preview(buffer: &PanelBuffer) -> RgbImage {
    let mode = buffer.mode();
    RgbImage::from_fn(mode.width, mode.height, |x, y| {
        let rgb = mode.depth.rgb_of(buffer.code(x, y)).unwrap_or([0xff; 3]);
        Rgb(rgb)
    })
}

/// Brings the image to the native resolution
///
/// An image in the transposed resolution is turned 90° counter-clockwise, anything
/// else is center-cropped to the panel's aspect ratio and then scaled.
fn fit(image: DynamicImage, mode: PanelMode) -> RgbaImage {
    let (width, height) = image.dimensions();
    if mode.width == 0 || mode.height == 0 {
        return RgbaImage::new(mode.width, mode.height);
    }
    let fitted = if (width, height) == (mode.width, mode.height) {
        image
    } else if width != height && (width, height) == (mode.height, mode.width) {
        debug!(width, height, "rotating portrait image");
        image.rotate270()
    } else {
        let (x, y, crop_width, crop_height) = crop_box(width, height, mode);
        debug!(width, height, crop_width, crop_height, "center-cropping");
        image
            .crop_imm(x, y, crop_width, crop_height)
            .resize_exact(mode.width, mode.height, FilterType::Lanczos3)
    };
    fitted.into_rgba8()
}

/// Largest centered region of a `width` x `height` image with the panel's aspect ratio
///
/// Never narrower or lower than one pixel, so extreme strips still produce a frame.
fn crop_box(width: u32, height: u32, mode: PanelMode) -> (u32, u32, u32, u32) {
    let (w, h) = (u64::from(width), u64::from(height));
    let (tw, th) = (u64::from(mode.width), u64::from(mode.height));
    let (crop_w, crop_h) = if w * th > h * tw {
        ((h * tw / th).clamp(1, w), h)
    } else {
        (w, (w * th / tw).clamp(1, h))
    };
    // both sides are bounded by the source dimensions
    let (crop_w, crop_h) = (crop_w as u32, crop_h as u32);
    ((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
}

/// Composites onto the white panel background
fn flatten(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        Rgb([over_white(r, a), over_white(g, a), over_white(b, a)])
    })
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let (c, a) = (u16::from(channel), u16::from(alpha));
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}

fn pack(image: &RgbImage, mode: PanelMode) -> PanelBuffer {
    let bpp = mode.depth.bits_per_pixel();
    // padding bits at the end of a row stay blank
    let mut fill = 0u8;
    for shift in (0..8).step_by(bpp) {
        fill.set_bits(shift..shift + bpp, mode.depth.blank_code());
    }

    let mut bytes = vec![fill; mode.buffer_len()];
    for (x, y, pixel) in image.enumerate_pixels() {
        let (index, bits) = locate(mode, x, y);
        bytes[index].set_bits(bits, mode.depth.nearest_code(pixel.0));
    }
    PanelBuffer { mode, bytes }
}

/// Palette lookup for the error diffusion of [`imageops::dither`]
struct PaletteMap(ColorDepth);

impl ColorMap for PaletteMap {
    type Color = Rgb<u8>;

    fn index_of(&self, color: &Rgb<u8>) -> usize {
        self.0.nearest_index(color.0)
    }

    fn map_color(&self, color: &mut Rgb<u8>) {
        let index = self.index_of(color);
        *color = Rgb(self.0.palette()[index].rgb);
    }
}
