//! Common types shared between the chunk layer and the decoder.

use byteorder::{BigEndian, ByteOrder};
use num_rational::Ratio;
use snafu::ensure;
use std::fmt;
use std::time::Duration;

use crate::error::{FileFormatSnafu, Result};

/// Describes how a pixel is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColorType {
    /// 1 grayscale sample.
    Grayscale = 0,
    /// 1 red sample, 1 green sample, 1 blue sample.
    Rgb = 2,
    /// 1 sample for the palette index.
    Indexed = 3,
    /// 1 grayscale sample, then 1 alpha sample.
    GrayscaleAlpha = 4,
    /// 1 red sample, 1 green sample, 1 blue sample, and finally, 1 alpha sample.
    Rgba = 6,
}

impl ColorType {
    /// Returns the number of samples used per pixel encoded in this way.
    pub fn samples(self) -> usize {
        use self::ColorType::*;
        match self {
            Grayscale | Indexed => 1,
            Rgb => 3,
            GrayscaleAlpha => 2,
            Rgba => 4,
        }
    }

    /// u8 -> Self. Temporary solution until Rust provides a canonical one.
    pub fn from_u8(n: u8) -> Option<ColorType> {
        match n {
            0 => Some(ColorType::Grayscale),
            2 => Some(ColorType::Rgb),
            3 => Some(ColorType::Indexed),
            4 => Some(ColorType::GrayscaleAlpha),
            6 => Some(ColorType::Rgba),
            _ => None,
        }
    }
}

/// Bit depth of the PNG file.
/// Specifies the number of bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitDepth {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
    Sixteen = 16,
}

impl BitDepth {
    /// u8 -> Self. Temporary solution until Rust provides a canonical one.
    pub fn from_u8(n: u8) -> Option<BitDepth> {
        match n {
            1 => Some(BitDepth::One),
            2 => Some(BitDepth::Two),
            4 => Some(BitDepth::Four),
            8 => Some(BitDepth::Eight),
            16 => Some(BitDepth::Sixteen),
            _ => None,
        }
    }

    pub(crate) fn into_u8(self) -> u8 {
        self as u8
    }
}

/// How to reset the canvas region of a frame before the next frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisposeOp {
    /// Leave the buffer unchanged.
    None = 0,
    /// Clear the frame's region of the buffer.
    Background = 1,
    /// Reset the buffer to the state before the frame was drawn.
    Previous = 2,
}

impl DisposeOp {
    /// u8 -> Self. Using enum_primitive or transmute is probably the right thing but this will do for now.
    pub fn from_u8(n: u8) -> Option<DisposeOp> {
        match n {
            0 => Some(DisposeOp::None),
            1 => Some(DisposeOp::Background),
            2 => Some(DisposeOp::Previous),
            _ => None,
        }
    }
}

impl fmt::Display for DisposeOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            DisposeOp::None => "DISPOSE_OP_NONE",
            DisposeOp::Background => "DISPOSE_OP_BACKGROUND",
            DisposeOp::Previous => "DISPOSE_OP_PREVIOUS",
        };
        write!(f, "{}", name)
    }
}

/// How a frame's pixels are written onto the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendOp {
    /// Pixels overwrite the value at their position.
    Source = 0,
    /// The new pixels are blended into the current state based on alpha.
    Over = 1,
}

impl BlendOp {
    /// u8 -> Self. Using enum_primitive or transmute is probably the right thing but this will do for now.
    pub fn from_u8(n: u8) -> Option<BlendOp> {
        match n {
            0 => Some(BlendOp::Source),
            1 => Some(BlendOp::Over),
            _ => None,
        }
    }
}

impl fmt::Display for BlendOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            BlendOp::Source => "BLEND_OP_SOURCE",
            BlendOp::Over => "BLEND_OP_OVER",
        };
        write!(f, "{}", name)
    }
}

/// The time one animation frame stays on screen, as a millisecond ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delay {
    ratio: Ratio<u32>,
}

impl Delay {
    /// Create a delay from a ratio of milliseconds.
    pub fn from_numer_denom_ms(numerator: u32, denominator: u32) -> Self {
        Delay {
            ratio: Ratio::new(numerator, denominator.max(1)),
        }
    }

    /// The numerator and denominator of the millisecond delay.
    pub fn numer_denom_ms(self) -> (u32, u32) {
        (*self.ratio.numer(), *self.ratio.denom())
    }
}

impl From<Delay> for Duration {
    fn from(delay: Delay) -> Self {
        let (numer, denom) = delay.numer_denom_ms();
        let whole_ms = u64::from(numer / denom);
        let rest_us = u64::from(numer % denom) * 1_000 / u64::from(denom);
        Duration::from_micros(whole_ms * 1_000 + rest_us)
    }
}

/// Frame control information
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameControl {
    /// Sequence number of the animation chunk, starting from 0
    pub sequence_number: u32,
    /// Width of the following frame
    pub width: u32,
    /// Height of the following frame
    pub height: u32,
    /// X position at which to render the following frame
    pub x_offset: u32,
    /// Y position at which to render the following frame
    pub y_offset: u32,
    /// Frame delay fraction numerator
    pub delay_num: u16,
    /// Frame delay fraction denominator
    pub delay_den: u16,
    /// Type of frame area disposal to be done after rendering this frame
    pub dispose_op: DisposeOp,
    /// Type of frame area rendering for this frame
    pub blend_op: BlendOp,
}

impl FrameControl {
    pub(crate) const PAYLOAD_LEN: usize = 26;

    /// Parses a `fcTL` payload.
    pub(crate) fn parse(data: &[u8]) -> Result<FrameControl> {
        ensure!(
            data.len() == Self::PAYLOAD_LEN,
            FileFormatSnafu {
                reason: format!("fcTL payload is {} bytes, expected 26", data.len()),
            }
        );
        let dispose_op = data[24];
        let dispose_op = match DisposeOp::from_u8(dispose_op) {
            Some(op) => op,
            None => {
                return FileFormatSnafu {
                    reason: format!("invalid dispose operation ({})", dispose_op),
                }
                .fail()
            }
        };
        let blend_op = data[25];
        let blend_op = match BlendOp::from_u8(blend_op) {
            Some(op) => op,
            None => {
                return FileFormatSnafu {
                    reason: format!("invalid blend operation ({})", blend_op),
                }
                .fail()
            }
        };
        Ok(FrameControl {
            sequence_number: BigEndian::read_u32(&data[0..4]),
            width: BigEndian::read_u32(&data[4..8]),
            height: BigEndian::read_u32(&data[8..12]),
            x_offset: BigEndian::read_u32(&data[12..16]),
            y_offset: BigEndian::read_u32(&data[16..20]),
            delay_num: BigEndian::read_u16(&data[20..22]),
            delay_den: BigEndian::read_u16(&data[22..24]),
            dispose_op,
            blend_op,
        })
    }

    /// Checks that the frame's region lies inside the image bounds.
    pub(crate) fn validate(&self, header: &ImageHeader) -> Result<()> {
        // Validate mathematically: width + x_offset <= header.width
        let in_x_bounds = Some(self.width) <= header.width.checked_sub(self.x_offset);
        // Validate mathematically: height + y_offset <= header.height
        let in_y_bounds = Some(self.height) <= header.height.checked_sub(self.y_offset);
        ensure!(
            in_x_bounds && in_y_bounds && self.width > 0 && self.height > 0,
            FileFormatSnafu {
                reason: "sub frame is out-of-bounds".to_string(),
            }
        );
        Ok(())
    }

    /// The on-screen duration of this frame.
    ///
    /// PNG delays are ratios of seconds; the standard dictates to replace
    /// the denominator by 100 when it is 0.
    pub fn delay(&self) -> Delay {
        let numer = u32::from(self.delay_num) * 1_000;
        let denom = match self.delay_den {
            0 => 100,
            d => u32::from(d),
        };
        Delay::from_numer_denom_ms(numer, denom)
    }
}

/// Animation control information
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimationControl {
    /// Number of frames
    pub num_frames: u32,
    /// Number of times to loop this APNG.  0 indicates infinite looping.
    pub num_plays: u32,
}

impl AnimationControl {
    /// Parses an `acTL` payload.
    pub(crate) fn parse(data: &[u8]) -> Result<AnimationControl> {
        ensure!(
            data.len() == 8,
            FileFormatSnafu {
                reason: format!("acTL payload is {} bytes, expected 8", data.len()),
            }
        );
        Ok(AnimationControl {
            num_frames: BigEndian::read_u32(&data[0..4]),
            num_plays: BigEndian::read_u32(&data[4..8]),
        })
    }
}

/// The image header, immutable for the life of the decoder.
#[derive(Clone, Copy, Debug)]
pub struct ImageHeader {
    /// Width of the full image in pixels.
    pub width: u32,
    /// Height of the full image in pixels.
    pub height: u32,
    /// Number of bits per sample.
    pub bit_depth: BitDepth,
    /// Pixel encoding.
    pub color_type: ColorType,
    /// Whether the stream uses Adam7 interlacing.
    pub interlaced: bool,
    raw: [u8; 13],
}

impl ImageHeader {
    pub(crate) const PAYLOAD_LEN: usize = 13;

    /// Parses an `IHDR` payload, retaining the raw bytes for re-encoding.
    pub(crate) fn parse(data: &[u8]) -> Result<ImageHeader> {
        ensure!(
            data.len() == Self::PAYLOAD_LEN,
            FileFormatSnafu {
                reason: format!("IHDR payload is {} bytes, expected 13", data.len()),
            }
        );
        let width = BigEndian::read_u32(&data[0..4]);
        let height = BigEndian::read_u32(&data[4..8]);
        ensure!(
            width > 0 && height > 0,
            FileFormatSnafu {
                reason: "zero image dimension".to_string(),
            }
        );
        let bit_depth = match BitDepth::from_u8(data[8]) {
            Some(bits) => bits,
            None => {
                return FileFormatSnafu {
                    reason: format!("invalid bit depth ({})", data[8]),
                }
                .fail()
            }
        };
        let color_type = match ColorType::from_u8(data[9]) {
            Some(color_type) => color_type,
            None => {
                return FileFormatSnafu {
                    reason: format!("invalid color type ({})", data[9]),
                }
                .fail()
            }
        };
        ensure!(
            data[10] == 0,
            FileFormatSnafu {
                reason: format!("unknown compression method ({})", data[10]),
            }
        );
        ensure!(
            data[11] == 0,
            FileFormatSnafu {
                reason: format!("unknown filter method ({})", data[11]),
            }
        );
        let interlaced = match data[12] {
            0 => false,
            1 => true,
            n => {
                return FileFormatSnafu {
                    reason: format!("unknown interlace method ({})", n),
                }
                .fail()
            }
        };
        let mut raw = [0; Self::PAYLOAD_LEN];
        raw.copy_from_slice(data);
        Ok(ImageHeader {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
            raw,
        })
    }

    /// Re-encodes the header payload with the dimensions overwritten.
    ///
    /// Everything past the first 8 bytes passes through unchanged.
    pub(crate) fn encode_with_size(&self, width: u32, height: u32) -> [u8; 13] {
        let mut data = self.raw;
        BigEndian::write_u32(&mut data[0..4], width);
        BigEndian::write_u32(&mut data[4..8], height);
        data
    }

    /// Bits per sample as decoded; indexed pixels expand to 8-bit samples.
    pub fn sample_depth(&self) -> u8 {
        match self.color_type {
            ColorType::Indexed => 8,
            _ => self.bit_depth.into_u8(),
        }
    }

    /// Bytes per pixel, counting indexed pixels as the RGBA they expand to
    /// at draw time.
    pub fn bytes_per_pixel(&self) -> usize {
        let components = match self.color_type {
            ColorType::Indexed => 4,
            ct => ct.samples(),
        };
        components * ((usize::from(self.sample_depth()) + 7) / 8)
    }

    /// Bytes in one row of the full image. Saturates rather than overflowing
    /// for degenerate header dimensions.
    pub fn bytes_per_row(&self) -> usize {
        (self.width as usize).saturating_mul(self.bytes_per_pixel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ihdr() -> [u8; 13] {
        let mut data = [0u8; 13];
        BigEndian::write_u32(&mut data[0..4], 64);
        BigEndian::write_u32(&mut data[4..8], 48);
        data[8] = 8; // bit depth
        data[9] = 6; // rgba
        data
    }

    #[test]
    fn parse_ihdr_roundtrip() {
        let header = ImageHeader::parse(&sample_ihdr()).unwrap();
        assert_eq!(header.width, 64);
        assert_eq!(header.height, 48);
        assert_eq!(header.bit_depth, BitDepth::Eight);
        assert_eq!(header.color_type, ColorType::Rgba);
        assert!(!header.interlaced);
        assert_eq!(header.bytes_per_pixel(), 4);
        assert_eq!(header.bytes_per_row(), 64 * 4);
    }

    #[test]
    fn rewriting_dimensions_keeps_the_tail() {
        let header = ImageHeader::parse(&sample_ihdr()).unwrap();
        let patched = header.encode_with_size(3, 2);
        assert_eq!(BigEndian::read_u32(&patched[0..4]), 3);
        assert_eq!(BigEndian::read_u32(&patched[4..8]), 2);
        assert_eq!(&patched[8..], &sample_ihdr()[8..]);
    }

    #[test]
    fn indexed_counts_four_components() {
        let mut data = sample_ihdr();
        data[9] = 3; // indexed
        let header = ImageHeader::parse(&data).unwrap();
        assert_eq!(header.sample_depth(), 8);
        assert_eq!(header.bytes_per_pixel(), 4);
    }

    #[test]
    fn rejects_bad_compression() {
        let mut data = sample_ihdr();
        data[10] = 1;
        assert!(ImageHeader::parse(&data).is_err());
    }

    #[test]
    fn parse_fctl_payload() {
        let mut data = [0u8; 26];
        BigEndian::write_u32(&mut data[0..4], 7);
        BigEndian::write_u32(&mut data[4..8], 5);
        BigEndian::write_u32(&mut data[8..12], 4);
        BigEndian::write_u32(&mut data[12..16], 1);
        BigEndian::write_u32(&mut data[16..20], 2);
        BigEndian::write_u16(&mut data[20..22], 1);
        BigEndian::write_u16(&mut data[22..24], 10);
        data[24] = 2; // previous
        data[25] = 1; // over
        let fc = FrameControl::parse(&data).unwrap();
        assert_eq!(fc.sequence_number, 7);
        assert_eq!((fc.width, fc.height), (5, 4));
        assert_eq!((fc.x_offset, fc.y_offset), (1, 2));
        assert_eq!(fc.dispose_op, DisposeOp::Previous);
        assert_eq!(fc.blend_op, BlendOp::Over);
        assert_eq!(fc.delay().numer_denom_ms(), (100, 1));
    }

    #[test]
    fn fctl_zero_denominator_becomes_100() {
        let mut data = [0u8; 26];
        BigEndian::write_u32(&mut data[4..8], 1);
        BigEndian::write_u32(&mut data[8..12], 1);
        BigEndian::write_u16(&mut data[20..22], 3);
        let fc = FrameControl::parse(&data).unwrap();
        assert_eq!(fc.delay().numer_denom_ms(), (30, 1));
        assert_eq!(Duration::from(fc.delay()), Duration::from_millis(30));
    }

    #[test]
    fn fctl_rejects_bad_dispose() {
        let mut data = [0u8; 26];
        BigEndian::write_u32(&mut data[4..8], 1);
        BigEndian::write_u32(&mut data[8..12], 1);
        data[24] = 3;
        assert!(FrameControl::parse(&data).is_err());
    }

    #[test]
    fn frame_bounds_are_checked() {
        let header = ImageHeader::parse(&sample_ihdr()).unwrap();
        let mut data = [0u8; 26];
        BigEndian::write_u32(&mut data[4..8], 60);
        BigEndian::write_u32(&mut data[8..12], 48);
        BigEndian::write_u32(&mut data[12..16], 5); // 60 + 5 > 64
        let fc = FrameControl::parse(&data).unwrap();
        assert!(fc.validate(&header).is_err());

        let mut data = [0u8; 26];
        BigEndian::write_u32(&mut data[4..8], 64);
        BigEndian::write_u32(&mut data[8..12], 48);
        let fc = FrameControl::parse(&data).unwrap();
        assert!(fc.validate(&header).is_ok());
    }
}
