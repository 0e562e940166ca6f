//! Contains detailed error representation.
//!
//! See the main [`DecodingError`] which carries one variant per failure
//! class. Construction errors are returned to the caller and no decoder is
//! built; post-construction errors surface through the decoder's output
//! slot. A subset of variants is *terminal* for the stream: once one has
//! been emitted, further render calls report [`DecodingError::FailedAlready`]
//! until the decoder is reset to its reset point.

use snafu::Snafu;
use std::io;

use crate::chunk::ChunkType;

/// The error type for APNG decoding operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodingError {
    /// The stream is not structurally a PNG: bad signature, or a chunk that
    /// cannot be parsed.
    #[snafu(display("file format error: {reason}"))]
    FileFormat { reason: String },

    /// A chunk the format requires is absent.
    #[snafu(display("required chunk {name} is missing"))]
    LackOfChunk { name: ChunkType },

    /// More than one `acTL` chunk was encountered.
    #[snafu(display("animation control chunk appeared more than once"))]
    MultipleAnimationControl,

    /// The declared frame count is zero, or exceeds the cap without the
    /// unlimited-frame-count option.
    #[snafu(display("invalid number of frames: {value}"))]
    InvalidNumberOfFrames { value: u32 },

    /// Sequence numbers over `fcTL` and `fdAT` chunks are not the series
    /// 0, 1, 2, …
    #[snafu(display("sequence is not in order, expected #{expected} got #{got}"))]
    WrongSequenceNumber { expected: u32, got: u32 },

    /// No `fdAT` payload where one frame's data was expected.
    #[snafu(display("no frame data found for sequence #{expected_sequence}"))]
    FrameDataNotFound { expected_sequence: u32 },

    /// No `IDAT` payload for the default image.
    #[snafu(display("no image data found for the default image"))]
    ImageDataNotFound,

    /// The stored CRC-32 of a chunk does not match the computed one.
    #[snafu(display(
        "CRC error in {chunk} chunk: stored {crc_val:#010x}, computed {crc_sum:#010x}"
    ))]
    CrcMismatch {
        chunk: ChunkType,
        crc_val: u32,
        crc_sum: u32,
    },

    /// The off-screen canvas could not be allocated.
    #[snafu(display("could not allocate a {width}x{height} canvas"))]
    CanvasCreation { width: u32, height: u32 },

    /// The PNG decoder rejected the byte stream synthesized for a frame.
    #[snafu(display("frame {index} holds image data the PNG decoder rejected"))]
    InvalidFrameImageData {
        index: usize,
        source: png::DecodingError,
    },

    /// An error was already emitted for this stream and it cannot be
    /// replayed; reset the decoder to retry from frame 0.
    #[snafu(display("a decoding error was already emitted for this stream"))]
    FailedAlready,

    /// An error occurred while interacting with the underlying reader.
    #[snafu(display("i/o error while reading the stream"))]
    Io { source: io::Error },
}

impl DecodingError {
    /// Whether the stream cannot produce further frames after this error.
    ///
    /// Terminal errors latch the decoder; `reset` rewinds to the reset
    /// point and clears the latch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecodingError::FileFormat { .. }
                | DecodingError::LackOfChunk { .. }
                | DecodingError::MultipleAnimationControl
                | DecodingError::WrongSequenceNumber { .. }
                | DecodingError::CrcMismatch { .. }
        )
    }
}

/// Result of an APNG decoding operation.
pub type Result<T, E = DecodingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;

    #[test]
    fn test_send_sync_stability() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<DecodingError>();
    }

    #[test]
    fn sequence_error_reports_both_numbers() {
        let err = DecodingError::WrongSequenceNumber {
            expected: 2,
            got: 3,
        };
        assert_eq!(err.to_string(), "sequence is not in order, expected #2 got #3");
        assert!(err.is_terminal());
    }

    #[test]
    fn lack_of_chunk_names_the_chunk() {
        let err = DecodingError::LackOfChunk { name: chunk::acTL };
        assert_eq!(err.to_string(), "required chunk acTL is missing");
    }

    #[test]
    fn data_not_found_is_not_terminal() {
        let err = DecodingError::FrameDataNotFound {
            expected_sequence: 4,
        };
        assert!(!err.is_terminal());
    }
}
