//! APNG frame assembly and decoding orchestration.

mod stream;

pub(crate) use self::stream::{ChunkRef, ChunkStream};

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use snafu::{ensure, ResultExt};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use crate::chunk;
use crate::common::{AnimationControl, Delay, FrameControl, ImageHeader};
use crate::compositor::{Compositor, RgbaCanvas};
use crate::error::{
    DecodingError, FailedAlreadySnafu, FileFormatSnafu, FrameDataNotFoundSnafu,
    ImageDataNotFoundSnafu, InvalidFrameImageDataSnafu, InvalidNumberOfFramesSnafu, IoSnafu,
    LackOfChunkSnafu, MultipleAnimationControlSnafu, Result, WrongSequenceNumberSnafu,
};
use crate::synthesis;

/// Streams declaring this many frames or more are rejected unless
/// [`DecodeOptions::UNLIMITED_FRAME_COUNT`] is set.
pub const FRAME_COUNT_LIMIT: u32 = 1024;

/// Upper bound on the estimated pixel footprint below which the
/// decoded-image cache is turned on for infinitely looping streams.
pub const MAX_CACHE_BYTES: u64 = 50 * 1024 * 1024;

bitflags! {
    /// Options recognized by [`Decoder`] construction.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DecodeOptions: u32 {
        /// Bypass CRC comparison for all chunks.
        const SKIP_CHECKSUM_VERIFY = 1 << 0;
        /// Keep every composed frame in memory, regardless of the inferred
        /// policy.
        const CACHE_DECODED_IMAGES = 1 << 1;
        /// Never keep composed frames in memory.
        const NOT_CACHE_DECODED_IMAGES = 1 << 2;
        /// Assemble every frame's metadata during construction.
        const FULL_FIRST_PASS = 1 << 3;
        /// Assemble and additionally render (caching when a cache is
        /// allocated) every frame during construction.
        const PRE_RENDER_ALL_FRAMES = 1 << 4;
        /// Read full frame payloads into memory during the first pass
        /// instead of storing chunk references to re-read on demand.
        const LOAD_FRAME_DATA = 1 << 5;
        /// Lift the frame-count cap.
        const UNLIMITED_FRAME_COUNT = 1 << 6;
    }
}

/// Payload bytes of one data chunk: a reference to re-read from the source,
/// or the bytes themselves when loaded eagerly.
#[derive(Clone, Debug)]
pub(crate) enum FrameData {
    Indexed(ChunkRef),
    Loaded(Arc<[u8]>),
}

/// One animation frame: its control record plus the ordered list of data
/// chunks (`fdAT` payloads, or the `IDAT` list when the frame is also the
/// default image).
#[derive(Clone, Debug)]
pub struct Frame {
    control: FrameControl,
    data: Vec<FrameData>,
}

impl Frame {
    /// The frame's control record.
    pub fn control(&self) -> &FrameControl {
        &self.control
    }
}

/// A fully composed frame as yielded by the [`Frames`] iterator.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    /// The composed full-canvas raster.
    pub raster: Arc<RgbaCanvas>,
    /// How long the frame stays on screen.
    pub delay: Delay,
    /// The frame index within the animation.
    pub index: usize,
}

/// Reader offset and sequence counter captured right after frame 0 renders,
/// letting `reset` rewind without re-running construction.
#[derive(Clone, Copy, Debug)]
struct ResetPoint {
    offset: u64,
    sequence: u32,
}

/// APNG decoder.
///
/// Construction parses the stream up to and including the first frame, so a
/// renderable frame 0 is available immediately afterwards. Frames past the
/// first are assembled lazily as playback advances, unless
/// [`DecodeOptions::FULL_FIRST_PASS`] asks for everything up front.
pub struct Decoder<R: Read + Seek> {
    stream: ChunkStream<R>,
    options: DecodeOptions,
    header: ImageHeader,
    animation: AnimationControl,
    /// Raw ancillary chunk bytes replayed into every synthesized PNG.
    shared_prefix: Vec<u8>,
    frames: Vec<Option<Frame>>,
    default_image: Vec<FrameData>,
    expected_sequence: u32,
    /// Index of the next frame the stream cursor is positioned to assemble.
    walk_index: usize,
    current_index: usize,
    output: Option<Arc<RgbaCanvas>>,
    compositor: Compositor,
    cache: Option<Vec<Option<Arc<RgbaCanvas>>>>,
    reset_point: ResetPoint,
    multiple_actl: bool,
    first_pass_done: bool,
    on_first_pass_done: Option<Box<dyn FnOnce() + Send>>,
    faulted: bool,
}

impl<R: Read + Seek + std::fmt::Debug> std::fmt::Debug for Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("stream", &self.stream)
            .field("options", &self.options)
            .field("header", &self.header)
            .field("animation", &self.animation)
            .field("shared_prefix", &self.shared_prefix)
            .field("frames", &self.frames)
            .field("default_image", &self.default_image)
            .field("expected_sequence", &self.expected_sequence)
            .field("walk_index", &self.walk_index)
            .field("current_index", &self.current_index)
            .field("output", &self.output)
            .field("compositor", &self.compositor)
            .field("cache", &self.cache)
            .field("reset_point", &self.reset_point)
            .field("multiple_actl", &self.multiple_actl)
            .field("first_pass_done", &self.first_pass_done)
            .field("on_first_pass_done", &self.on_first_pass_done.is_some())
            .field("faulted", &self.faulted)
            .finish()
    }
}

impl Decoder<Cursor<Vec<u8>>> {
    /// Creates a decoder over an in-memory byte buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::with_options(Cursor::new(bytes), DecodeOptions::empty())
    }

    /// Creates a decoder over an in-memory byte buffer with explicit options.
    pub fn from_bytes_with_options(bytes: Vec<u8>, options: DecodeOptions) -> Result<Self> {
        Self::with_options(Cursor::new(bytes), options)
    }
}

impl Decoder<BufReader<File>> {
    /// Creates a decoder over a file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_path_with_options(path, DecodeOptions::empty())
    }

    /// Creates a decoder over a file on disk with explicit options.
    pub fn from_path_with_options<P: AsRef<Path>>(
        path: P,
        options: DecodeOptions,
    ) -> Result<Self> {
        let file = File::open(path).context(IoSnafu)?;
        Self::with_options(BufReader::new(file), options)
    }
}

impl<R: Read + Seek> Decoder<R> {
    /// Creates a decoder that reads from `reader` with default options.
    pub fn new(reader: R) -> Result<Decoder<R>> {
        Self::with_options(reader, DecodeOptions::empty())
    }

    /// Creates a decoder that reads from `reader`.
    ///
    /// On success, frame 0 has been rendered and is available through
    /// [`output`](Self::output).
    pub fn with_options(reader: R, options: DecodeOptions) -> Result<Decoder<R>> {
        let verify_crc = !options.contains(DecodeOptions::SKIP_CHECKSUM_VERIFY);
        let mut stream = ChunkStream::new(reader, verify_crc);
        stream.match_signature()?;

        let first = stream.peek()?;
        ensure!(
            first.type_ == chunk::IHDR,
            FileFormatSnafu {
                reason: "IHDR chunk missing",
            }
        );
        let header = ImageHeader::parse(&stream.consume(&first)?)?;
        debug!(
            "image header: {}x{}, {:?}, {:?}",
            header.width, header.height, header.color_type, header.bit_depth
        );

        // Walk forward to the animation control. A frame control for frame 0
        // may legally precede it; everything else ancillary is carried
        // verbatim for per-frame PNG synthesis.
        let mut shared_prefix = Vec::new();
        let mut first_control: Option<FrameControl> = None;
        let mut expected_sequence = 0u32;
        let animation = loop {
            let head = stream.peek()?;
            match head.type_ {
                chunk::acTL => break AnimationControl::parse(&stream.consume(&head)?)?,
                chunk::fcTL => {
                    let control = FrameControl::parse(&stream.consume(&head)?)?;
                    control.validate(&header)?;
                    check_sequence(&mut expected_sequence, control.sequence_number)?;
                    first_control = Some(control);
                }
                chunk::IDAT | chunk::IEND => {
                    return LackOfChunkSnafu { name: chunk::acTL }.fail();
                }
                _ => shared_prefix.extend_from_slice(&stream.read_raw(&head)?),
            }
        };
        debug!(
            "animation control: {} frames, {} plays",
            animation.num_frames, animation.num_plays
        );

        ensure!(
            animation.num_frames > 0,
            InvalidNumberOfFramesSnafu { value: 0u32 }
        );
        ensure!(
            animation.num_frames < FRAME_COUNT_LIMIT
                || options.contains(DecodeOptions::UNLIMITED_FRAME_COUNT),
            InvalidNumberOfFramesSnafu {
                value: animation.num_frames,
            }
        );

        let num_frames = animation.num_frames as usize;
        let cache = should_cache(options, &header, &animation)
            .then(|| (0..num_frames).map(|_| None).collect());
        let compositor = Compositor::new(header.width, header.height)?;

        let mut decoder = Decoder {
            stream,
            options,
            header,
            animation,
            shared_prefix,
            frames: (0..num_frames).map(|_| None).collect(),
            default_image: Vec::new(),
            expected_sequence,
            walk_index: 1,
            current_index: 0,
            output: None,
            compositor,
            cache,
            reset_point: ResetPoint {
                offset: 0,
                sequence: 0,
            },
            multiple_actl: false,
            first_pass_done: false,
            on_first_pass_done: None,
            faulted: false,
        };

        decoder.extract_first_frame(first_control)?;
        ensure!(!decoder.multiple_actl, MultipleAnimationControlSnafu);

        let output = decoder.render_frame(0)?;
        decoder.output = Some(output);
        decoder.reset_point = ResetPoint {
            offset: decoder.stream.position()?,
            sequence: decoder.expected_sequence,
        };

        if decoder.num_frames() == 1 {
            decoder.verify_trailer()?;
            decoder.finish_first_pass();
        } else if options
            .intersects(DecodeOptions::FULL_FIRST_PASS | DecodeOptions::PRE_RENDER_ALL_FRAMES)
        {
            decoder.run_full_first_pass()?;
        }
        Ok(decoder)
    }

    /// Number of frames the animation declares.
    pub fn num_frames(&self) -> usize {
        self.animation.num_frames as usize
    }

    /// Number of plays the animation declares; 0 means looping forever.
    pub fn num_plays(&self) -> u32 {
        self.animation.num_plays
    }

    /// The animation control record.
    pub fn animation_control(&self) -> AnimationControl {
        self.animation
    }

    /// The image header record.
    pub fn image_header(&self) -> &ImageHeader {
        &self.header
    }

    /// Full-canvas dimensions in pixels.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    /// Index of the frame most recently surfaced through
    /// [`output`](Self::output).
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// The most recently composed frame, if the last render succeeded.
    pub fn output(&self) -> Option<&Arc<RgbaCanvas>> {
        self.output.as_ref()
    }

    /// The control record of frame `index`, once it has been assembled.
    pub fn frame_control(&self, index: usize) -> Option<&FrameControl> {
        self.frames.get(index)?.as_ref().map(Frame::control)
    }

    /// Whether every frame's metadata has been assembled.
    pub fn is_first_pass_done(&self) -> bool {
        self.first_pass_done
    }

    /// Installs the observer fired once after the last frame is assembled.
    ///
    /// When the first pass already completed (single-frame stream, or
    /// [`DecodeOptions::FULL_FIRST_PASS`]) the hook is invoked immediately.
    pub fn set_on_first_pass_done<F: FnOnce() + Send + 'static>(&mut self, hook: F) {
        if self.first_pass_done {
            hook();
        } else {
            self.on_first_pass_done = Some(Box::new(hook));
        }
    }

    /// Synthesizes a standalone PNG of the default image, the still-image
    /// fallback for callers that cannot animate.
    pub fn default_image_png(&mut self) -> Result<Vec<u8>> {
        let data = self.default_image.clone();
        let payload = self.load_frame_payload(&data)?;
        Ok(synthesis::synthesize_frame_png(
            &self.header,
            self.header.width,
            self.header.height,
            &self.shared_prefix,
            &payload,
        ))
    }

    /// Advances to the next frame on the calling context, wrapping to frame
    /// 0 after the last one, and returns the composed raster.
    ///
    /// After a terminal stream error this keeps failing with
    /// [`DecodingError::FailedAlready`] until [`reset`](Self::reset).
    pub fn render_next_sync(&mut self) -> Result<Arc<RgbaCanvas>> {
        ensure!(!self.faulted, FailedAlreadySnafu);
        self.output = None;
        match self.advance() {
            Ok(output) => {
                self.output = Some(output.clone());
                Ok(output)
            }
            Err(err) => {
                if err.is_terminal() {
                    self.faulted = true;
                }
                Err(err)
            }
        }
    }

    /// Rewinds playback to frame 0.
    ///
    /// A partially filled cache is discarded wholesale; a complete cache is
    /// kept. No-op when frame 0 is already current.
    pub fn reset(&mut self) -> Result<()> {
        if self.current_index == 0 && !self.faulted {
            return Ok(());
        }
        if let Some(cache) = &mut self.cache {
            // Partial caches are not safe to resume from.
            if cache.iter().any(Option::is_none) {
                debug!("discarding partially filled frame cache");
                for slot in cache.iter_mut() {
                    *slot = None;
                }
            }
        }
        self.stream.seek_to(self.reset_point.offset)?;
        self.expected_sequence = self.reset_point.sequence;
        self.walk_index = 1;
        self.faulted = false;
        self.current_index = 0;
        let output = self.render_frame(0)?;
        self.output = Some(output);
        Ok(())
    }

    /// Turns the decoder into an iterator over one full pass of composed
    /// frames, starting with frame 0.
    pub fn into_frames(self) -> Frames<R> {
        Frames {
            decoder: self,
            emitted_first: false,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Arc<RgbaCanvas>> {
        let next = (self.current_index + 1) % self.num_frames();
        if !self.first_pass_done && next == self.walk_index {
            self.assemble_frame(next)?;
        }
        let output = self.render_frame(next)?;
        self.current_index = next;
        Ok(output)
    }

    /// Runs steps 7 of the construction protocol: isolates the default
    /// image's `IDAT` list and produces frame 0, in either stream form.
    fn extract_first_frame(&mut self, mut first_control: Option<FrameControl>) -> Result<()> {
        loop {
            let head = self.stream.peek()?;
            match head.type_ {
                chunk::fcTL if first_control.is_none() => {
                    let control = FrameControl::parse(&self.stream.consume(&head)?)?;
                    control.validate(&self.header)?;
                    check_sequence(&mut self.expected_sequence, control.sequence_number)?;
                    first_control = Some(control);
                }
                chunk::IDAT => break,
                chunk::acTL => {
                    self.multiple_actl = true;
                    self.stream.skip(&head)?;
                }
                chunk::fcTL | chunk::IEND => return ImageDataNotFoundSnafu.fail(),
                _ => {
                    let raw = self.stream.read_raw(&head)?;
                    self.shared_prefix.extend_from_slice(&raw);
                }
            }
        }

        self.default_image = self.collect_default_image()?;
        ensure!(!self.default_image.is_empty(), ImageDataNotFoundSnafu);

        let frame0 = match first_control {
            // The default image doubles as frame 0.
            Some(control) => Frame {
                control,
                data: self.default_image.clone(),
            },
            // The default image stands alone; frame 0 is the next
            // fcTL + fdAT group.
            None => {
                let control = loop {
                    let head = self.stream.peek()?;
                    match head.type_ {
                        chunk::fcTL => {
                            let control = FrameControl::parse(&self.stream.consume(&head)?)?;
                            control.validate(&self.header)?;
                            check_sequence(&mut self.expected_sequence, control.sequence_number)?;
                            break control;
                        }
                        chunk::acTL => {
                            self.multiple_actl = true;
                            self.stream.skip(&head)?;
                        }
                        chunk::IEND => {
                            return FrameDataNotFoundSnafu {
                                expected_sequence: self.expected_sequence,
                            }
                            .fail()
                        }
                        _ => self.stream.skip(&head)?,
                    }
                };
                Frame {
                    control,
                    data: self.collect_frame_data()?,
                }
            }
        };
        self.frames[0] = Some(frame0);
        Ok(())
    }

    /// Collects the consecutive `IDAT` chunks of the default image.
    fn collect_default_image(&mut self) -> Result<Vec<FrameData>> {
        let mut list = Vec::new();
        loop {
            let head = self.stream.peek()?;
            if head.type_ != chunk::IDAT {
                break;
            }
            let data = if self.options.contains(DecodeOptions::LOAD_FRAME_DATA) {
                FrameData::Loaded(self.stream.consume(&head)?.into())
            } else {
                FrameData::Indexed(self.stream.index(&head)?)
            };
            list.push(data);
        }
        Ok(list)
    }

    /// Collects consecutive `fdAT` chunks into one frame's data list,
    /// checking each sequence number. Stops with the cursor before the
    /// terminating `fcTL` or `IEND`.
    fn collect_frame_data(&mut self) -> Result<Vec<FrameData>> {
        let mut list = Vec::new();
        loop {
            let head = self.stream.peek()?;
            match head.type_ {
                chunk::fdAT => {
                    ensure!(
                        head.length >= 4,
                        FileFormatSnafu {
                            reason: "fdAT chunk shorter than its sequence number",
                        }
                    );
                    if self.options.contains(DecodeOptions::LOAD_FRAME_DATA) {
                        let payload = self.stream.consume(&head)?;
                        let got = BigEndian::read_u32(&payload[0..4]);
                        check_sequence(&mut self.expected_sequence, got)?;
                        list.push(FrameData::Loaded(payload[4..].to_vec().into()));
                    } else {
                        let raw = self.stream.index(&head)?;
                        let seq = self.stream.load(&ChunkRef {
                            offset: raw.offset,
                            length: 4,
                        })?;
                        check_sequence(&mut self.expected_sequence, BigEndian::read_u32(&seq))?;
                        list.push(FrameData::Indexed(ChunkRef {
                            offset: raw.offset + 4,
                            length: raw.length - 4,
                        }));
                    }
                }
                chunk::acTL => {
                    self.multiple_actl = true;
                    self.stream.skip(&head)?;
                }
                chunk::fcTL | chunk::IEND => break,
                _ => self.stream.skip(&head)?,
            }
        }
        ensure!(
            !list.is_empty(),
            FrameDataNotFoundSnafu {
                expected_sequence: self.expected_sequence,
            }
        );
        Ok(list)
    }

    /// Walks the stream forward to assemble frame `index` (≥ 1).
    fn assemble_frame(&mut self, index: usize) -> Result<()> {
        debug_assert_eq!(index, self.walk_index);
        let control = loop {
            let head = self.stream.peek()?;
            match head.type_ {
                chunk::fcTL => {
                    let control = FrameControl::parse(&self.stream.consume(&head)?)?;
                    control.validate(&self.header)?;
                    check_sequence(&mut self.expected_sequence, control.sequence_number)?;
                    break control;
                }
                chunk::acTL => {
                    self.multiple_actl = true;
                    self.stream.skip(&head)?;
                }
                chunk::IEND => {
                    return FrameDataNotFoundSnafu {
                        expected_sequence: self.expected_sequence,
                    }
                    .fail()
                }
                _ => self.stream.skip(&head)?,
            }
        };
        let data = self.collect_frame_data()?;
        ensure!(!self.multiple_actl, MultipleAnimationControlSnafu);
        trace!("assembled frame {} ({} data chunks)", index, data.len());
        self.frames[index] = Some(Frame { control, data });
        self.walk_index = index + 1;
        if self.walk_index == self.num_frames() {
            self.verify_trailer()?;
            self.finish_first_pass();
        }
        Ok(())
    }

    /// Confirms the stream ends in `IEND` after the last frame's data.
    fn verify_trailer(&mut self) -> Result<()> {
        loop {
            let head = match self.stream.peek() {
                Ok(head) => head,
                Err(DecodingError::Io { source })
                    if source.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    return LackOfChunkSnafu { name: chunk::IEND }.fail()
                }
                Err(err) => return Err(err),
            };
            match head.type_ {
                chunk::IEND => {
                    ensure!(!self.multiple_actl, MultipleAnimationControlSnafu);
                    return Ok(());
                }
                chunk::acTL => {
                    self.multiple_actl = true;
                    self.stream.skip(&head)?;
                }
                _ => self.stream.skip(&head)?,
            }
        }
    }

    fn run_full_first_pass(&mut self) -> Result<()> {
        let pre_render = self.options.contains(DecodeOptions::PRE_RENDER_ALL_FRAMES);
        for index in 1..self.num_frames() {
            self.assemble_frame(index)?;
            if pre_render {
                self.render_frame(index)?;
            }
        }
        if pre_render {
            // Put the canvas and the published output back into the state a
            // fresh construction would have.
            let output = self.render_frame(0)?;
            self.output = Some(output);
        }
        Ok(())
    }

    fn finish_first_pass(&mut self) {
        if !self.first_pass_done {
            self.first_pass_done = true;
            debug!("first pass complete, {} frames assembled", self.num_frames());
            if let Some(hook) = self.on_first_pass_done.take() {
                hook();
            }
        }
    }

    /// Composes the raster for frame `index` from cache or from its stored
    /// data chunks.
    fn render_frame(&mut self, index: usize) -> Result<Arc<RgbaCanvas>> {
        if let Some(cache) = &self.cache {
            if let Some(image) = &cache[index] {
                // A populated slot implies the pass that filled it composed
                // every frame; the canvas state is no longer consulted.
                trace!("frame {} served from cache", index);
                return Ok(image.clone());
            }
        }
        let (control, data) = {
            let frame = self.frames[index]
                .as_ref()
                .expect("frame is assembled before it renders");
            (frame.control, frame.data.clone())
        };
        let payload = self.load_frame_payload(&data)?;
        let png_bytes = synthesis::synthesize_frame_png(
            &self.header,
            control.width,
            control.height,
            &self.shared_prefix,
            &payload,
        );
        let sub_image = decode_sub_image(&png_bytes, index)?;
        let output = self.compositor.render(&control, &sub_image, index);
        if let Some(cache) = &mut self.cache {
            cache[index] = Some(output.clone());
        }
        Ok(output)
    }

    fn load_frame_payload(&mut self, data: &[FrameData]) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        for part in data {
            match part {
                FrameData::Loaded(bytes) => payload.extend_from_slice(bytes),
                FrameData::Indexed(reference) => {
                    payload.extend_from_slice(&self.stream.load(reference)?)
                }
            }
        }
        Ok(payload)
    }
}

/// Cache policy: explicit options win; otherwise infinitely looping streams
/// whose estimated footprint stays under [`MAX_CACHE_BYTES`] are cached.
fn should_cache(
    options: DecodeOptions,
    header: &ImageHeader,
    animation: &AnimationControl,
) -> bool {
    if options.contains(DecodeOptions::CACHE_DECODED_IMAGES) {
        return true;
    }
    if options.contains(DecodeOptions::NOT_CACHE_DECODED_IMAGES) {
        return false;
    }
    let total = (header.bytes_per_row() as u64)
        .saturating_mul(u64::from(header.height))
        .saturating_mul(u64::from(animation.num_frames));
    animation.num_plays == 0 && total < MAX_CACHE_BYTES
}

fn check_sequence(expected: &mut u32, got: u32) -> Result<()> {
    ensure!(
        got == *expected,
        WrongSequenceNumberSnafu {
            expected: *expected,
            got,
        }
    );
    *expected += 1;
    Ok(())
}

/// Decodes a synthesized per-frame PNG into an RGBA sub-image via the host
/// PNG decoder.
fn decode_sub_image(bytes: &[u8], index: usize) -> Result<RgbaCanvas> {
    let mut decoder = png::Decoder::new(bytes);
    // Expand palettes and sub-byte depths, strip 16-bit samples: composition
    // always runs on 8-bit channels.
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .context(InvalidFrameImageDataSnafu { index })?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .context(InvalidFrameImageDataSnafu { index })?;
    buf.truncate(info.buffer_size());

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => {
            let mut rgba = Vec::with_capacity(buf.len() / 3 * 4);
            for px in buf.chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            rgba
        }
        png::ColorType::Grayscale => {
            let mut rgba = Vec::with_capacity(buf.len() * 4);
            for &l in &buf {
                rgba.extend_from_slice(&[l, l, l, 255]);
            }
            rgba
        }
        png::ColorType::GrayscaleAlpha => {
            let mut rgba = Vec::with_capacity(buf.len() * 2);
            for px in buf.chunks_exact(2) {
                rgba.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
            rgba
        }
        png::ColorType::Indexed => unreachable!("indexed output is expanded to RGB"),
    };
    Ok(RgbaCanvas::from_raw(info.width, info.height, rgba)
        .expect("synthesized dimensions match the frame control"))
}

/// Iterator over one full pass of composed frames.
///
/// Yields frame 0 first (already rendered during construction), then each
/// following frame, and stops after the last one.
pub struct Frames<R: Read + Seek> {
    decoder: Decoder<R>,
    emitted_first: bool,
    done: bool,
}

impl<R: Read + Seek> Iterator for Frames<R> {
    type Item = Result<RenderedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.emitted_first {
            self.emitted_first = true;
            let raster = self.decoder.output()?.clone();
            let delay = self.decoder.frame_control(0)?.delay();
            return Some(Ok(RenderedFrame {
                raster,
                delay,
                index: 0,
            }));
        }
        match self.decoder.render_next_sync() {
            Ok(raster) => {
                let index = self.decoder.current_index();
                if index == 0 {
                    // Wrapped around: the pass is complete.
                    self.done = true;
                    return None;
                }
                let delay = self
                    .decoder
                    .frame_control(index)
                    .expect("rendered frame is assembled")
                    .delay();
                Some(Ok(RenderedFrame {
                    raster,
                    delay,
                    index,
                }))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
