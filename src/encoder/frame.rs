use std::io::{self, Write};
use std::ops::Range;

use super::DisposalMethod;

const EXTENSION_INTRODUCER: u8 = 0x21;
const GRAPHIC_CONTROL_LABEL: u8 = 0xf9;
const IMAGE_DESCRIPTOR_LABEL: u8 = 0x2c;

const TRANSPARENT_COLOR_FLAG: u8 = 0b0000_0001;
const DISPOSAL_MASK: u8 = 0b0001_1100;

/// A rectangle on the logical screen, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(left: u16, top: u16, width: u16, height: u16) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub const fn canvas(width: u16, height: u16) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Index ranges of each row of this rectangle within a row-major buffer `stride` wide.
    pub fn rows(&self, stride: usize) -> impl Iterator<Item = Range<usize>> {
        let left = usize::from(self.left);
        let width = usize::from(self.width);
        let top = usize::from(self.top);
        (top..top + usize::from(self.height)).map(move |y| {
            let start = y * stride + left;
            start..start + width
        })
    }
}

/// A compressed frame waiting in the queue.
///
/// Everything except the graphic control fields is final once the frame is built. Delay and
/// disposal of a frame depend on the frame that follows it and are patched in afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    // packed graphic control fields: 000 DDD 0 T
    flags: u8,
    transparent_color_index: u8,
    delay_time: u16,
    pub rect: Rect,
    pub lzw: Vec<u8>,
}

impl EncodedFrame {
    pub fn new(rect: Rect, lzw: Vec<u8>) -> Self {
        Self {
            flags: 0,
            transparent_color_index: 0,
            delay_time: 0,
            rect,
            lzw,
        }
    }

    pub fn transparent(&self) -> Option<u8> {
        (self.flags & TRANSPARENT_COLOR_FLAG != 0).then_some(self.transparent_color_index)
    }

    pub fn set_transparent(&mut self, index: Option<u8>) {
        match index {
            Some(index) => {
                self.flags |= TRANSPARENT_COLOR_FLAG;
                self.transparent_color_index = index;
            }
            None => {
                self.flags &= !TRANSPARENT_COLOR_FLAG;
                self.transparent_color_index = 0;
            }
        }
    }

    pub fn disposal(&self) -> DisposalMethod {
        DisposalMethod::from_u8((self.flags & DISPOSAL_MASK) >> 2).unwrap_or_default()
    }

    /// Merges disposal bits into this frame, the way later frames amend earlier ones.
    pub fn add_disposal(&mut self, disposal: DisposalMethod) {
        self.flags |= (disposal as u8) << 2;
    }

    pub fn delay(&self) -> u16 {
        self.delay_time
    }

    pub fn set_delay(&mut self, delay: u16) {
        self.delay_time = delay;
    }

    fn needs_graphic_control(&self) -> bool {
        self.flags != 0 || self.delay_time != 0
    }

    /// Serialized length: graphic control extension, image descriptor and data.
    pub fn encoded_len(&self) -> usize {
        let control = if self.needs_graphic_control() { 8 } else { 0 };
        control + 10 + self.lzw.len()
    }

    /// Appends the frame to `out`: graphic control extension when any of its fields is set,
    /// then the image descriptor and the compressed data.
    pub fn encode(&self, out: &mut Vec<u8>) {
        if self.needs_graphic_control() {
            let [delay_lo, delay_hi] = self.delay_time.to_le_bytes();
            out.extend_from_slice(&[
                EXTENSION_INTRODUCER,
                GRAPHIC_CONTROL_LABEL,
                4,
                self.flags,
                delay_lo,
                delay_hi,
                self.transparent_color_index,
                0,
            ]);
        }

        out.push(IMAGE_DESCRIPTOR_LABEL);
        for value in [
            self.rect.left,
            self.rect.top,
            self.rect.width,
            self.rect.height,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        // no local color table, not interlaced
        out.push(0);

        out.extend_from_slice(&self.lzw);
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.encode(&mut bytes);
        out.write_all(&bytes)
    }
}
