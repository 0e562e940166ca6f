//! Materializes a standalone PNG byte stream for a single frame.
//!
//! The decoder never inflates pixel data itself; instead each frame's
//! compressed bytes are wrapped back into a minimal PNG (signature, `IHDR`
//! rewritten to the frame's dimensions, the shared ancillary chunks carried
//! verbatim, one `IDAT`, `IEND`) and handed to the `png` crate.

use byteorder::{BigEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Write};

use crate::chunk::{self, ChunkType};
use crate::common::ImageHeader;

// http://www.w3.org/TR/PNG-Structure.html
// The first eight bytes of a PNG file always contain the following (decimal) values:
pub(crate) const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// A complete `IEND` chunk: zero length, name, CRC.
pub(crate) const IEND_BYTES: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Writes one chunk: length, name, payload and the CRC-32 over name and
/// payload.
pub(crate) fn write_chunk<W: Write>(mut w: W, name: ChunkType, data: &[u8]) -> io::Result<()> {
    w.write_u32::<BigEndian>(data.len() as u32)?;
    w.write_all(&name.0)?;
    w.write_all(data)?;
    let mut crc = Crc32::new();
    crc.update(&name.0);
    crc.update(data);
    w.write_u32::<BigEndian>(crc.finalize())?;
    Ok(())
}

/// Builds a standalone PNG whose pixel grid equals one frame's sub-region.
///
/// `data` is the concatenation of the frame's compressed payload bytes
/// (`fdAT` payloads minus their sequence numbers, or the `IDAT` payloads of
/// the default image); `prefix` is the raw ancillary chunk bytes shared by
/// every frame.
pub(crate) fn synthesize_frame_png(
    header: &ImageHeader,
    width: u32,
    height: u32,
    prefix: &[u8],
    data: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(PNG_SIGNATURE.len() + 25 + prefix.len() + data.len() + 24);
    out.extend_from_slice(&PNG_SIGNATURE);
    // Infallible: writing to a Vec cannot error.
    let _ = write_chunk(&mut out, chunk::IHDR, &header.encode_with_size(width, height));
    out.extend_from_slice(prefix);
    let _ = write_chunk(&mut out, chunk::IDAT, data);
    out.extend_from_slice(&IEND_BYTES);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iend_literal_is_a_valid_chunk() {
        let mut encoded = Vec::new();
        write_chunk(&mut encoded, chunk::IEND, &[]).unwrap();
        assert_eq!(encoded, IEND_BYTES);
    }

    #[test]
    fn written_chunk_has_the_documented_crc() {
        // CRC-32 of "IEND" is the well-known AE 42 60 82.
        let mut encoded = Vec::new();
        write_chunk(&mut encoded, chunk::IEND, &[]).unwrap();
        assert_eq!(&encoded[8..], &[0xAE, 0x42, 0x60, 0x82]);
    }

    #[test]
    fn synthesized_stream_decodes_as_png() {
        let mut ihdr = [0u8; 13];
        ihdr[0..4].copy_from_slice(&4u32.to_be_bytes());
        ihdr[4..8].copy_from_slice(&4u32.to_be_bytes());
        ihdr[8] = 8; // bit depth
        ihdr[9] = 6; // rgba
        let header = ImageHeader::parse(&ihdr).unwrap();

        // A 2x2 RGBA sub-frame, stored uncompressed in a zlib container.
        let mut raw = Vec::new();
        for row in 0..2u8 {
            raw.push(0); // filter
            for col in 0..2u8 {
                raw.extend_from_slice(&[row * 100, col * 100, 0, 255]);
            }
        }
        let mut zlib = Vec::new();
        let mut compressor =
            fdeflate::StoredOnlyCompressor::new(std::io::Cursor::new(&mut zlib)).unwrap();
        compressor.write_data(&raw).unwrap();
        compressor.finish().unwrap();

        let bytes = synthesize_frame_png(&header, 2, 2, &[], &zlib);
        let decoder = png::Decoder::new(&bytes[..]);
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (2, 2));
        assert_eq!(&buf[..4], &[0, 0, 0, 255]);
        assert_eq!(&buf[4..8], &[0, 100, 0, 255]);
    }
}
