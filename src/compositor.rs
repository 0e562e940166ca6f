//! Off-screen canvas and the dispose/blend state machine.
//!
//! The compositor owns a single mutable canvas of the full image size and
//! the last two composed outputs, which is exactly the state needed to
//! honor `dispose=previous`. Coordinates are PNG-space: row-major,
//! top-down, with the frame rectangle at `(x_offset, y_offset)`.

use std::sync::Arc;

use crate::common::{BlendOp, DisposeOp, FrameControl};
use crate::error::{CanvasCreationSnafu, Result};

/// An 8-bit RGBA raster, row-major, top-down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbaCanvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaCanvas {
    /// Allocates a fully transparent canvas.
    pub(crate) fn new(width: u32, height: u32) -> Result<RgbaCanvas> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4));
        let len = match len {
            Some(len) => len,
            None => return CanvasCreationSnafu { width, height }.fail(),
        };
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            return CanvasCreationSnafu { width, height }.fail();
        }
        data.resize(len, 0);
        Ok(RgbaCanvas {
            width,
            height,
            data,
        })
    }

    /// Wraps a raw RGBA buffer. Returns `None` when the length does not
    /// match the dimensions.
    pub(crate) fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<RgbaCanvas> {
        if data.len() == width as usize * height as usize * 4 {
            Some(RgbaCanvas {
                width,
                height,
                data,
            })
        } else {
            None
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The raw RGBA bytes, row-major, four bytes per pixel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The RGBA value at `(x, y)`.
    ///
    /// Panics when the coordinate is outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.width && y < self.height);
        let at = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]
    }

    fn row(&mut self, x: u32, y: u32, width: u32) -> &mut [u8] {
        let start = (y as usize * self.width as usize + x as usize) * 4;
        &mut self.data[start..start + width as usize * 4]
    }

    fn clear(&mut self) {
        self.data.fill(0);
    }

    fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        for row in y..y + height {
            self.row(x, row, width).fill(0);
        }
    }

    /// Replaces the region at `(x, y)` with `src` (`blend=source`).
    fn copy_rect(&mut self, src: &RgbaCanvas, x: u32, y: u32) {
        for src_y in 0..src.height {
            let from = (src_y as usize * src.width as usize) * 4;
            let len = src.width as usize * 4;
            self.row(x, y + src_y, src.width)
                .copy_from_slice(&src.data[from..from + len]);
        }
    }

    /// Alpha-composites `src` over the region at `(x, y)` (`blend=over`).
    fn blend_rect(&mut self, src: &RgbaCanvas, x: u32, y: u32) {
        for src_y in 0..src.height {
            let from = (src_y as usize * src.width as usize) * 4;
            let dst_row = self.row(x, y + src_y, src.width);
            let src_row = &src.data[from..from + src.width as usize * 4];
            for (dst, pixel) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                blend_pixel(dst, pixel);
            }
        }
    }
}

/// Straight-alpha OVER compositing of one pixel.
fn blend_pixel(dst: &mut [u8], src: &[u8]) {
    let src_a = u32::from(src[3]);
    if src_a == 255 {
        dst.copy_from_slice(src);
        return;
    }
    if src_a == 0 {
        return;
    }
    let dst_a = u32::from(dst[3]);
    let inv = 255 - src_a;
    // src_a > 0, so out_a > 0.
    let out_a = src_a + dst_a * inv / 255;
    for c in 0..3 {
        dst[c] =
            ((u32::from(src[c]) * src_a + u32::from(dst[c]) * dst_a * inv / 255) / out_a) as u8;
    }
    dst[3] = out_a as u8;
}

/// Dispose/blend state machine producing the final raster for each frame.
#[derive(Debug)]
pub(crate) struct Compositor {
    canvas: RgbaCanvas,
    previous_output: Option<Arc<RgbaCanvas>>,
    current_output: Option<Arc<RgbaCanvas>>,
    previous_control: Option<FrameControl>,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Result<Compositor> {
        Ok(Compositor {
            canvas: RgbaCanvas::new(width, height)?,
            previous_output: None,
            current_output: None,
            previous_control: None,
        })
    }

    /// Composes frame `index` from its decoded sub-image and returns an
    /// immutable snapshot of the canvas.
    pub fn render(
        &mut self,
        control: &FrameControl,
        sub_image: &RgbaCanvas,
        index: usize,
    ) -> Arc<RgbaCanvas> {
        if index == 0 {
            // Each pass starts from a fully cleared canvas.
            self.canvas.clear();
            self.previous_output = None;
            self.current_output = None;
            self.previous_control = None;
        } else if let Some(previous) = self.previous_control {
            match previous.dispose_op {
                DisposeOp::None => {}
                DisposeOp::Background => self.canvas.clear_rect(
                    previous.x_offset,
                    previous.y_offset,
                    previous.width,
                    previous.height,
                ),
                DisposeOp::Previous => match &self.previous_output {
                    Some(output) => {
                        self.canvas.clear();
                        self.canvas.copy_rect(output, 0, 0);
                    }
                    // The previous frame was the first one; treat as background.
                    None => self.canvas.clear_rect(
                        previous.x_offset,
                        previous.y_offset,
                        previous.width,
                        previous.height,
                    ),
                },
            }
        }

        match control.blend_op {
            BlendOp::Source => self
                .canvas
                .copy_rect(sub_image, control.x_offset, control.y_offset),
            BlendOp::Over => self
                .canvas
                .blend_rect(sub_image, control.x_offset, control.y_offset),
        }

        let next_output = Arc::new(self.canvas.clone());
        self.previous_output = self.current_output.take();
        self.current_output = Some(next_output.clone());
        self.previous_control = Some(*control);
        next_output
    }
}
