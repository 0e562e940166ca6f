//! Decoding of animated PNG (APNG) streams.
//!
//! An APNG stream is a PNG carrying an animation control chunk (`acTL`) and
//! per-frame control/data chunks (`fcTL`, `fdAT`). This crate walks those
//! chunks, rebuilds a standalone PNG for every frame so the `png` crate can
//! decode its pixels, and composes the frames onto an off-screen canvas
//! under the dispose and blend operations the stream prescribes.
//!
//! Construction parses up to and including the first frame, so frame 0 is
//! renderable immediately:
//!
//! ```no_run
//! use apng::Decoder;
//!
//! # fn main() -> apng::Result<()> {
//! let mut decoder = Decoder::from_path("animation.png")?;
//! println!(
//!     "{} frames, {}x{}",
//!     decoder.num_frames(),
//!     decoder.intrinsic_size().0,
//!     decoder.intrinsic_size().1,
//! );
//! let frame0 = decoder.output().expect("rendered during construction").clone();
//! let frame1 = decoder.render_next_sync()?;
//! decoder.reset()?;
//! # Ok(())
//! # }
//! ```
//!
//! For display loops that must not block, [`Player`] moves the decoder onto
//! a serial worker thread and publishes composed frames for polling.
//!
//! A stream without `acTL` fails with
//! [`DecodingError::LackOfChunk`], which callers can use to fall back to a
//! still-image path; [`Decoder::default_image_png`] hands them the fallback
//! bytes.
//!
//! # Related Links
//! * <https://www.w3.org/TR/png-3/#apng-frame-based-animation> - The APNG specification
#![forbid(unsafe_code)]

pub mod chunk;
mod common;
mod compositor;
mod decoder;
mod error;
mod player;
mod synthesis;

pub use crate::common::{
    AnimationControl, BitDepth, BlendOp, ColorType, Delay, DisposeOp, FrameControl, ImageHeader,
};
pub use crate::compositor::RgbaCanvas;
pub use crate::decoder::{
    DecodeOptions, Decoder, Frame, Frames, RenderedFrame, FRAME_COUNT_LIMIT, MAX_CACHE_BYTES,
};
pub use crate::error::{DecodingError, Result};
pub use crate::player::{Player, PlayerOutput};
