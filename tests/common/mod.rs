//! Helpers for building synthetic APNG streams.
//!
//! Like the fixtures the PNG test suites use, these perform no validation of
//! the data being written, so test cases can construct arbitrary, potentially
//! invalid streams. Pixel data is wrapped in store-only zlib containers, so
//! the fixtures stay byte-for-byte deterministic.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

/// Writes the PNG signature.
pub fn write_png_sig(w: &mut Vec<u8>) {
    const SIG: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
    w.write_all(&SIG).unwrap();
}

/// Writes an arbitrary PNG chunk.
pub fn write_chunk(w: &mut Vec<u8>, chunk_type: &[u8], data: &[u8]) {
    assert_eq!(chunk_type.len(), 4);
    let crc = {
        let input = chunk_type
            .iter()
            .copied()
            .chain(data.iter().copied())
            .collect::<Vec<_>>();
        crc32fast::hash(input.as_slice())
    };
    w.write_u32::<BigEndian>(data.len() as u32).unwrap();
    w.write_all(chunk_type).unwrap();
    w.write_all(data).unwrap();
    w.write_u32::<BigEndian>(crc).unwrap();
}

/// Writes an IHDR chunk for a non-interlaced RGBA8 image.
pub fn write_ihdr(w: &mut Vec<u8>, width: u32, height: u32) {
    let mut data = Vec::new();
    data.write_u32::<BigEndian>(width).unwrap();
    data.write_u32::<BigEndian>(height).unwrap();
    data.write_u8(8).unwrap(); // bit depth
    data.write_u8(6).unwrap(); // color type = color + alpha
    data.write_u8(0).unwrap(); // compression method
    data.write_u8(0).unwrap(); // filter method
    data.write_u8(0).unwrap(); // interlace method
    write_chunk(w, b"IHDR", &data);
}

/// Writes an acTL chunk.
pub fn write_actl(w: &mut Vec<u8>, num_frames: u32, num_plays: u32) {
    let mut data = Vec::new();
    data.write_u32::<BigEndian>(num_frames).unwrap();
    data.write_u32::<BigEndian>(num_plays).unwrap();
    write_chunk(w, b"acTL", &data);
}

/// The 26-byte fcTL payload. Delay is fixed at 1/10 s.
pub fn fctl_payload(
    seq: u32,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    dispose: u8,
    blend: u8,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.write_u32::<BigEndian>(seq).unwrap();
    data.write_u32::<BigEndian>(width).unwrap();
    data.write_u32::<BigEndian>(height).unwrap();
    data.write_u32::<BigEndian>(x).unwrap();
    data.write_u32::<BigEndian>(y).unwrap();
    data.write_u16::<BigEndian>(1).unwrap(); // delay numerator
    data.write_u16::<BigEndian>(10).unwrap(); // delay denominator
    data.write_u8(dispose).unwrap();
    data.write_u8(blend).unwrap();
    data
}

/// Writes an fcTL chunk.
#[allow(clippy::too_many_arguments)]
pub fn write_fctl(
    w: &mut Vec<u8>,
    seq: u32,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    dispose: u8,
    blend: u8,
) {
    write_chunk(w, b"fcTL", &fctl_payload(seq, width, height, x, y, dispose, blend));
}

/// Writes an fdAT chunk carrying `data` under sequence number `seq`.
pub fn write_fdat(w: &mut Vec<u8>, seq: u32, data: &[u8]) {
    let mut payload = Vec::new();
    payload.write_u32::<BigEndian>(seq).unwrap();
    payload.extend_from_slice(data);
    write_chunk(w, b"fdAT", &payload);
}

/// Writes an IEND chunk.
pub fn write_iend(w: &mut Vec<u8>) {
    write_chunk(w, b"IEND", &[]);
}

/// Wraps raw bytes in a store-only zlib container.
pub fn zlib_stored(raw: &[u8]) -> Vec<u8> {
    let mut zlib = Vec::new();
    let mut compressor =
        fdeflate::StoredOnlyCompressor::new(std::io::Cursor::new(&mut zlib)).unwrap();
    compressor.write_data(raw).unwrap();
    compressor.finish().unwrap();
    zlib
}

/// Filtered RGBA8 scanlines (filter 0 per row) for a `width`-pixel-wide
/// image; `pixels` is row-major and must be a multiple of `width`.
pub fn rgba_scanlines(pixels: &[[u8; 4]], width: u32) -> Vec<u8> {
    assert_eq!(pixels.len() % width as usize, 0);
    let mut raw = Vec::new();
    for row in pixels.chunks(width as usize) {
        raw.push(0); // filter = no filter
        for px in row {
            raw.extend_from_slice(px);
        }
    }
    raw
}

/// Compressed image data for a sub-frame.
pub fn frame_payload(pixels: &[[u8; 4]], width: u32) -> Vec<u8> {
    zlib_stored(&rgba_scanlines(pixels, width))
}

/// A complete 1x1 RGBA8 APNG in form A: frame 0 doubles as the default
/// image, every later frame is one fcTL + fdAT pair with `dispose=none,
/// blend=source`. `num_plays` is 0 (infinite).
pub fn solid_1x1_apng(frames: &[[u8; 4]]) -> Vec<u8> {
    solid_1x1_apng_with_plays(frames, 0)
}

/// Same as [`solid_1x1_apng`] with an explicit play count.
pub fn solid_1x1_apng_with_plays(frames: &[[u8; 4]], num_plays: u32) -> Vec<u8> {
    let mut w = Vec::new();
    write_png_sig(&mut w);
    write_ihdr(&mut w, 1, 1);
    write_actl(&mut w, frames.len() as u32, num_plays);
    write_fctl(&mut w, 0, 1, 1, 0, 0, 0, 0);
    write_chunk(&mut w, b"IDAT", &frame_payload(&frames[..1], 1));
    let mut seq = 1;
    for px in &frames[1..] {
        write_fctl(&mut w, seq, 1, 1, 0, 0, 0, 0);
        write_fdat(&mut w, seq + 1, &frame_payload(std::slice::from_ref(px), 1));
        seq += 2;
    }
    write_iend(&mut w);
    w
}
