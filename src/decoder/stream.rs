//! Peek-then-decide chunk traversal over a seekable byte source.
//!
//! [`ChunkStream`] wraps the reader that backs a decoder. `peek` reads the
//! upcoming 8-byte chunk header and rewinds, so the caller can inspect the
//! chunk name and length and then pick one of the consuming actions:
//! [`consume`](ChunkStream::consume) (typed payload), [`index`](ChunkStream::index)
//! (record a payload reference, skipping the bytes), [`read_raw`](ChunkStream::read_raw)
//! (verbatim chunk bytes) or [`skip`](ChunkStream::skip). Doing nothing after a
//! peek leaves the cursor before the chunk header, which is the walker's
//! "reset" action.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use log::trace;
use snafu::{ensure, ResultExt};
use std::io::{self, Read, Seek, SeekFrom};

use crate::chunk::ChunkType;
use crate::error::{CrcMismatchSnafu, FileFormatSnafu, IoSnafu, Result};
use crate::synthesis::PNG_SIGNATURE;

/// Header of an upcoming chunk, as returned by [`ChunkStream::peek`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChunkHeader {
    /// Absolute offset of the 8-byte length/name header.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u32,
    /// Chunk name.
    pub type_: ChunkType,
}

impl ChunkHeader {
    fn data_offset(&self) -> u64 {
        self.offset + 8
    }

    fn end_offset(&self) -> u64 {
        self.data_offset() + u64::from(self.length) + 4
    }
}

/// A record sufficient to re-read a chunk payload later: absolute offset
/// and length of the payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkRef {
    pub offset: u64,
    pub length: u32,
}

/// Byte-oriented source with chunk-level primitives.
///
/// The in-memory and file-backed variants are `Cursor<Vec<u8>>` and
/// `BufReader<File>`; both share these semantics, the difference is purely
/// in backing storage.
#[derive(Debug)]
pub(crate) struct ChunkStream<R> {
    reader: R,
    verify_crc: bool,
}

impl<R: Read + Seek> ChunkStream<R> {
    pub fn new(reader: R, verify_crc: bool) -> ChunkStream<R> {
        ChunkStream { reader, verify_crc }
    }

    /// Current absolute offset of the streaming cursor.
    pub fn position(&mut self) -> Result<u64> {
        self.reader.stream_position().context(IoSnafu)
    }

    /// Moves the streaming cursor to an absolute offset.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu)?;
        Ok(())
    }

    /// Consumes and checks the 8-byte PNG signature.
    pub fn match_signature(&mut self) -> Result<()> {
        let mut signature = [0u8; 8];
        self.reader.read_exact(&mut signature).context(IoSnafu)?;
        ensure!(
            signature == PNG_SIGNATURE,
            FileFormatSnafu {
                reason: "PNG signature mismatch",
            }
        );
        Ok(())
    }

    /// Reads the upcoming chunk header, then rewinds to just before it.
    pub fn peek(&mut self) -> Result<ChunkHeader> {
        let offset = self.position()?;
        let mut head = [0u8; 8];
        self.reader.read_exact(&mut head).context(IoSnafu)?;
        self.seek_to(offset)?;
        ensure!(
            head[4..8].iter().all(|b| b.is_ascii_alphabetic()),
            FileFormatSnafu {
                reason: format!("unparseable chunk header at offset {}", offset),
            }
        );
        Ok(ChunkHeader {
            offset,
            length: BigEndian::read_u32(&head[0..4]),
            type_: ChunkType([head[4], head[5], head[6], head[7]]),
        })
    }

    /// Consumes the chunk fully, returning its payload.
    pub fn consume(&mut self, header: &ChunkHeader) -> Result<Vec<u8>> {
        self.seek_to(header.data_offset())?;
        let payload = self.read_vec(header.length as usize)?;
        let stored = self.reader.read_u32::<BigEndian>().context(IoSnafu)?;
        if self.verify_crc {
            self.check_crc(header.type_, &payload, stored)?;
        }
        Ok(payload)
    }

    /// Consumes the chunk, recording only a reference to its payload.
    ///
    /// When checksum verification is on, the payload is read transiently to
    /// feed the CRC; otherwise the bytes are skipped outright.
    pub fn index(&mut self, header: &ChunkHeader) -> Result<ChunkRef> {
        if self.verify_crc {
            self.consume(header)?;
        } else {
            self.seek_to(header.end_offset())?;
        }
        trace!(
            "indexed {} chunk: {} payload bytes at offset {}",
            header.type_,
            header.length,
            header.data_offset()
        );
        Ok(ChunkRef {
            offset: header.data_offset(),
            length: header.length,
        })
    }

    /// Consumes the chunk and returns its bytes verbatim, length, name and
    /// CRC included, so they can be replayed into a synthesized stream.
    pub fn read_raw(&mut self, header: &ChunkHeader) -> Result<Vec<u8>> {
        self.seek_to(header.offset)?;
        let total = 8 + header.length as usize + 4;
        let raw = self.read_vec(total)?;
        if self.verify_crc {
            let stored = BigEndian::read_u32(&raw[total - 4..]);
            self.check_crc(header.type_, &raw[8..total - 4], stored)?;
        }
        Ok(raw)
    }

    /// Consumes the chunk and discards it.
    pub fn skip(&mut self, header: &ChunkHeader) -> Result<()> {
        if self.verify_crc {
            self.consume(header)?;
        } else {
            self.seek_to(header.end_offset())?;
        }
        Ok(())
    }

    /// Absolute read of `chunk.length` bytes at `chunk.offset` without
    /// disturbing the streaming cursor.
    pub fn load(&mut self, chunk: &ChunkRef) -> Result<Vec<u8>> {
        let saved = self.position()?;
        self.seek_to(chunk.offset)?;
        let data = self.read_vec(chunk.length as usize)?;
        self.seek_to(saved)?;
        Ok(data)
    }

    fn check_crc(&self, type_: ChunkType, payload: &[u8], stored: u32) -> Result<()> {
        let mut crc = Crc32::new();
        crc.update(&type_.0);
        crc.update(payload);
        let sum = crc.finalize();
        ensure!(
            stored == sum,
            CrcMismatchSnafu {
                chunk: type_,
                crc_val: stored,
                crc_sum: sum,
            }
        );
        Ok(())
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut vec = Vec::new();
        vec.try_reserve_exact(len)
            .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))
            .context(IoSnafu)?;
        match (&mut self.reader).take(len as u64).read_to_end(&mut vec) {
            Ok(read) if read == len => Ok(vec),
            Ok(_) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)).context(IoSnafu),
            Err(err) => Err(err).context(IoSnafu),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use crate::error::DecodingError;
    use crate::synthesis::write_chunk;
    use std::io::Cursor;

    fn stream_of(chunks: &[(ChunkType, &[u8])], verify: bool) -> ChunkStream<Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        for (name, data) in chunks {
            write_chunk(&mut bytes, *name, data).unwrap();
        }
        ChunkStream::new(Cursor::new(bytes), verify)
    }

    #[test]
    fn peek_leaves_cursor_in_place() {
        let mut stream = stream_of(&[(chunk::IDAT, &[1, 2, 3])], true);
        let first = stream.peek().unwrap();
        let second = stream.peek().unwrap();
        assert_eq!(first.offset, second.offset);
        assert_eq!(first.length, 3);
        assert_eq!(first.type_, chunk::IDAT);
        assert_eq!(stream.position().unwrap(), 0);
    }

    #[test]
    fn consume_checks_the_crc() {
        let mut stream = stream_of(&[(chunk::IDAT, &[9, 9])], true);
        let header = stream.peek().unwrap();
        assert_eq!(stream.consume(&header).unwrap(), vec![9, 9]);
    }

    #[test]
    fn corrupt_crc_is_detected() {
        let mut bytes = Vec::new();
        write_chunk(&mut bytes, chunk::IDAT, &[1, 2, 3]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut stream = ChunkStream::new(Cursor::new(bytes.clone()), true);
        let header = stream.peek().unwrap();
        match stream.consume(&header) {
            Err(DecodingError::CrcMismatch { chunk, .. }) => assert_eq!(chunk, chunk::IDAT),
            other => panic!("expected CrcMismatch, got {:?}", other),
        }

        // The same stream passes with verification disabled.
        let mut stream = ChunkStream::new(Cursor::new(bytes), false);
        let header = stream.peek().unwrap();
        assert_eq!(stream.consume(&header).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn index_then_load_round_trips_without_moving_the_cursor() {
        let mut stream = stream_of(
            &[(chunk::fdAT, &[0, 0, 0, 1, 42]), (chunk::IEND, &[])],
            true,
        );
        let header = stream.peek().unwrap();
        let reference = stream.index(&header).unwrap();
        assert_eq!(reference.offset, 8);
        assert_eq!(reference.length, 5);

        let after_chunk = stream.position().unwrap();
        assert_eq!(stream.load(&reference).unwrap(), vec![0, 0, 0, 1, 42]);
        assert_eq!(stream.position().unwrap(), after_chunk);
        assert_eq!(stream.peek().unwrap().type_, chunk::IEND);
    }

    #[test]
    fn read_raw_returns_the_whole_chunk() {
        let mut expected = Vec::new();
        write_chunk(&mut expected, chunk::tEXt, b"k\0v").unwrap();
        let mut stream = stream_of(&[(chunk::tEXt, b"k\0v")], true);
        let header = stream.peek().unwrap();
        assert_eq!(stream.read_raw(&header).unwrap(), expected);
    }

    #[test]
    fn short_stream_reports_eof() {
        let mut stream = ChunkStream::new(Cursor::new(vec![0u8, 0, 0, 9]), true);
        assert!(matches!(stream.peek(), Err(DecodingError::Io { .. })));
    }
}
