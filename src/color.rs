//! Panel colors and palettes

/// Black/White colors for one bit per pixel panels
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    /// Black color
    Black,
    /// White color
    White,
}

impl Color {
    /// Both colors in palette order
    pub const ALL: [Color; 2] = [Color::Black, Color::White];

    /// Get the color encoding of the color for one bit
    pub const fn get_bit_value(&self) -> u8 {
        match self {
            Color::White => 1u8,
            Color::Black => 0u8,
        }
    }

    /// Parses the one bit color code, anything but 0 and 1 is rejected
    pub fn from_bit_value(val: u8) -> Option<Self> {
        match val {
            0 => Some(Color::Black),
            1 => Some(Color::White),
            _ => None,
        }
    }

    /// RGB value of the color
    pub const fn rgb(&self) -> [u8; 3] {
        match self {
            Color::Black => [0x00, 0x00, 0x00],
            Color::White => [0xff, 0xff, 0xff],
        }
    }
}

/// The six colors of a Spectra 6 panel (e.g. the 7.3inch (E))
///
/// The controller uses 4 bits per pixel. Codes 0x4 and 0x7..=0xF are not displayable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SpectraColor {
    /// Black
    Black,
    /// White
    White,
    /// Yellow
    Yellow,
    /// Red
    Red,
    /// Blue
    Blue,
    /// Green
    Green,
}

impl SpectraColor {
    /// All colors in palette order. This is also the tie-break order of the quantizer.
    pub const ALL: [SpectraColor; 6] = [
        SpectraColor::Black,
        SpectraColor::White,
        SpectraColor::Yellow,
        SpectraColor::Red,
        SpectraColor::Blue,
        SpectraColor::Green,
    ];

    /// Get the 4 bit controller code of the color
    pub const fn get_nibble(self) -> u8 {
        match self {
            SpectraColor::Black => 0x0,
            SpectraColor::White => 0x1,
            SpectraColor::Yellow => 0x2,
            SpectraColor::Red => 0x3,
            SpectraColor::Blue => 0x5,
            SpectraColor::Green => 0x6,
        }
    }

    /// Parses a 4 bit controller code
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(SpectraColor::Black),
            0x1 => Some(SpectraColor::White),
            0x2 => Some(SpectraColor::Yellow),
            0x3 => Some(SpectraColor::Red),
            0x5 => Some(SpectraColor::Blue),
            0x6 => Some(SpectraColor::Green),
            _ => None,
        }
    }

    /// Two pixels packed into one byte, `left` ends up in the high nibble
    pub fn colors_byte(left: SpectraColor, right: SpectraColor) -> u8 {
        (left.get_nibble() << 4) | right.get_nibble()
    }

    /// RGB value of the color
    pub const fn rgb(self) -> [u8; 3] {
        match self {
            SpectraColor::Black => [0x00, 0x00, 0x00],
            SpectraColor::White => [0xff, 0xff, 0xff],
            SpectraColor::Yellow => [0xff, 0xff, 0x00],
            SpectraColor::Red => [0xff, 0x00, 0x00],
            SpectraColor::Blue => [0x00, 0x00, 0xff],
            SpectraColor::Green => [0x00, 0xff, 0x00],
        }
    }
}

/// One displayable color: what it looks like and what the controller calls it
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PaletteEntry {
    /// RGB value used for quantization and previews
    pub rgb: [u8; 3],
    /// Code written into the panel buffer
    pub code: u8,
}

const SPECTRA6_PALETTE: [PaletteEntry; 6] = {
    let mut table = [PaletteEntry { rgb: [0; 3], code: 0 }; 6];
    let mut i = 0;
    while i < table.len() {
        let color = SpectraColor::ALL[i];
        table[i] = PaletteEntry {
            rgb: color.rgb(),
            code: color.get_nibble(),
        };
        i += 1;
    }
    table
};

const MONO_PALETTE: [PaletteEntry; 2] = {
    let mut table = [PaletteEntry { rgb: [0; 3], code: 0 }; 2];
    let mut i = 0;
    while i < table.len() {
        let color = Color::ALL[i];
        table[i] = PaletteEntry {
            rgb: color.rgb(),
            code: color.get_bit_value(),
        };
        i += 1;
    }
    table
};

/// Color depth mode of a panel, decides palette and bit layout of the buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ColorDepth {
    /// 1 bit per pixel, 8 pixels per byte, MSB is the leftmost pixel
    Mono,
    /// 4 bits per pixel, 2 pixels per byte, high nibble is the left pixel
    Spectra6,
}

impl ColorDepth {
    /// Number of bits one pixel occupies in the buffer
    pub const fn bits_per_pixel(self) -> usize {
        match self {
            ColorDepth::Mono => 1,
            ColorDepth::Spectra6 => 4,
        }
    }

    /// The fixed palette of this mode
    pub fn palette(self) -> &'static [PaletteEntry] {
        match self {
            ColorDepth::Mono => &MONO_PALETTE,
            ColorDepth::Spectra6 => &SPECTRA6_PALETTE,
        }
    }

    /// Code of the blank (white) color
    pub fn blank_code(self) -> u8 {
        match self {
            ColorDepth::Mono => Color::White.get_bit_value(),
            ColorDepth::Spectra6 => SpectraColor::White.get_nibble(),
        }
    }

    /// Index into [`ColorDepth::palette`] of the color nearest to `rgb`
    ///
    /// Nearest means the smallest squared euclidean distance in RGB space,
    /// on a tie the lowest palette index wins.
    pub fn nearest_index(self, rgb: [u8; 3]) -> usize {
        let mut best = u32::MAX;
        let mut best_index = 0;
        for (index, entry) in self.palette().iter().enumerate() {
            let d = dist2(rgb, entry.rgb);
            if d < best {
                best = d;
                best_index = index;
            }
        }
        best_index
    }

    /// Controller code of the color nearest to `rgb`
    pub fn nearest_code(self, rgb: [u8; 3]) -> u8 {
        self.palette()[self.nearest_index(rgb)].code
    }

    /// RGB value for a controller code, `None` for codes outside the palette
    pub fn rgb_of(self, code: u8) -> Option<[u8; 3]> {
        match self {
            ColorDepth::Mono => Color::from_bit_value(code).map(|c| c.rgb()),
            ColorDepth::Spectra6 => SpectraColor::from_nibble(code).map(SpectraColor::rgb),
        }
    }
}

fn dist2(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = i32::from(x) - i32::from(y);
            (d * d) as u32
        })
        .sum()
}
