//! Animated GIF89a encoder.
//!
//! Frames go through a fixed pipeline: [`optimizer`] finds the dirty rectangle, picks a
//! disposal method for the preceding frame and an optional transparent color, [`lzw`]
//! compresses the rectangle, and [`queue`] holds the result until the following frame has
//! patched its delay and disposal bits. [`writer::GifWriter`] drives all of it and owns the
//! output sink.

mod bit_writer;
mod frame;
mod lzw;
mod optimizer;
mod queue;
mod writer;

use std::io;

use thiserror::Error;

pub use frame::{EncodedFrame, Rect};
pub use lzw::lzw_compress;
pub use writer::{extend_palette, Destination, FileDestination, GifWriter};

/// Every GIF code fits in 12 bits.
pub(crate) const CODE_LIMIT: u16 = 1 << 12;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalMethod {
    #[default]
    Unspecified = 0,
    DoNotDispose = 1,
    RestoreToBackgroundColor = 2,
    RestoreToPrevious = 3,
}

impl DisposalMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DisposalMethod::Unspecified),
            1 => Some(DisposalMethod::DoNotDispose),
            2 => Some(DisposalMethod::RestoreToBackgroundColor),
            3 => Some(DisposalMethod::RestoreToPrevious),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub const fn gray(level: u8) -> Self {
        Self::new(level, level, level)
    }
}

/// A fully decoded input frame: one palette index per pixel, covering the whole canvas.
#[derive(Debug, Clone, Default)]
pub struct SourceFrame {
    pub width: u16,
    pub height: u16,
    /// Row-major, `width * height` bytes.
    pub pixels: Vec<u8>,
    pub palette: Vec<Rgb>,
    pub transparent: Option<u8>,
    /// Time to wait before showing this frame, in source ticks.
    pub delay: u32,
    /// Ticks per second. Zero keeps the rate from earlier frames.
    pub tick_rate: u32,
    /// How many frames back this frame's data refers to. The last frame's value is the
    /// number of trailing frames dropped when the stream is finished.
    pub interleave: u8,
}

impl SourceFrame {
    pub fn new(width: u16, height: u16, pixels: Vec<u8>, palette: Vec<Rgb>) -> Self {
        Self {
            width,
            height,
            pixels,
            palette,
            ..Default::default()
        }
    }

    pub fn with_transparent(mut self, index: u8) -> Self {
        self.transparent = Some(index);
        self
    }

    pub fn with_timing(mut self, delay: u32, tick_rate: u32) -> Self {
        self.delay = delay;
        self.tick_rate = tick_rate;
        self
    }

    pub fn with_interleave(mut self, interleave: u8) -> Self {
        self.interleave = interleave;
        self
    }

    pub(crate) fn area(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Frames held back before being written. Never less than one.
    pub queue_capacity: usize,
    /// Ticks per second assumed until a frame declares its own rate.
    pub default_frame_rate: u32,
    /// Write the Netscape looping extension for animations.
    pub loop_animation: bool,
    /// Overrides the trailing-frame count taken from the last frame's interleave.
    pub drop_trailing: Option<usize>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            // PAL
            default_frame_rate: 50,
            loop_animation: true,
            drop_trailing: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame is {width}x{height} but carries {actual} pixels")]
    FrameSize {
        width: u16,
        height: u16,
        actual: usize,
    },

    #[error("frame is {width}x{height}, expected the canvas size {canvas_width}x{canvas_height}")]
    CanvasMismatch {
        width: u16,
        height: u16,
        canvas_width: u16,
        canvas_height: u16,
    },

    #[error("pixel index {index} is outside the {palette_len}-entry palette")]
    IndexOutOfPalette { index: u8, palette_len: usize },

    #[error("could not write to {destination}: {source}")]
    Write {
        destination: String,
        #[source]
        source: io::Error,
    },
}
