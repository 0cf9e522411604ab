use log::debug;

use super::frame::{EncodedFrame, Rect};
use super::lzw::lzw_compress;
use super::{DisposalMethod, SourceFrame};

/// Changes a new frame makes to the frame queued before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PriorPatch {
    pub(crate) disposal: DisposalMethod,
    /// `None` leaves the queued frame's delay untouched.
    pub(crate) delay: Option<u16>,
}

impl PriorPatch {
    pub(crate) fn apply(&self, frame: &mut EncodedFrame) {
        frame.add_disposal(self.disposal);
        if let Some(delay) = self.delay {
            frame.set_delay(delay);
        }
    }
}

/// Output of one optimization step: the new frame, plus the patch for the frame before it
/// when there is one.
#[derive(Debug)]
pub(crate) struct Optimized {
    pub(crate) frame: EncodedFrame,
    pub(crate) patch: Option<PriorPatch>,
}

/// Per-stream frame analysis. Keeps the clock used to turn source ticks into GIF delays.
#[derive(Debug)]
pub(crate) struct FrameOptimizer {
    palette_len: usize,
    minimum_code_size: u8,
    frame_rate: u32,
    total_ticks: u64,
    // elapsed output time, in 1/100 s
    gif_time: u64,
}

impl FrameOptimizer {
    pub(crate) fn new(palette_bits: u8, frame_rate: u32) -> Self {
        let minimum_code_size = if palette_bits == 0 { 8 } else { palette_bits.max(2) };
        Self {
            palette_len: 1 << palette_bits,
            minimum_code_size,
            frame_rate: frame_rate.max(1),
            total_ticks: 0,
            gif_time: 0,
        }
    }

    /// Builds the encoded frame for `source`.
    ///
    /// `previous` is the canvas as the decoder will show it before this frame, or `None` when
    /// nothing is known about it. Choosing to dispose the preceding frame clears it to the
    /// transparent color. `has_prior` tells whether a queued frame is waiting for its patch.
    pub(crate) fn optimize(
        &mut self,
        previous: Option<&mut Vec<u8>>,
        source: &SourceFrame,
        has_prior: bool,
    ) -> Optimized {
        if source.tick_rate > 0 {
            self.frame_rate = source.tick_rate;
        }

        let stride = usize::from(source.width);
        let current = source.pixels.as_slice();
        let canvas = Rect::canvas(source.width, source.height);

        let mut disposal = DisposalMethod::DoNotDispose;
        let mut rect = canvas;
        let mut previous = previous;

        if let Some(before) = previous.as_deref_mut() {
            rect = minimum_area(before, current, source.width, source.height);
            if has_prior {
                disposal = select_disposal(
                    Some(before.as_slice()),
                    current,
                    stride,
                    rect,
                    source.transparent,
                );
                if let (DisposalMethod::RestoreToBackgroundColor, Some(transparent)) =
                    (disposal, source.transparent)
                {
                    before.fill(transparent);
                    rect = minimum_area(before, current, source.width, source.height);
                }
            }
        }

        let patch = has_prior.then(|| PriorPatch {
            disposal,
            delay: self.advance_clock(source.delay),
        });

        let mut frame = EncodedFrame::new(rect, Vec::new());
        frame.set_transparent(source.transparent);

        let previous = previous.map(|before| before.as_slice());
        let substitute = match previous {
            Some(before) if has_prior && disposal != DisposalMethod::RestoreToBackgroundColor => {
                match source.transparent {
                    Some(transparent) => Some((before, transparent, false)),
                    None => select_transparent_color(before, current, stride, rect, self.palette_len)
                        .map(|transparent| (before, transparent, true)),
                }
            }
            _ => None,
        };

        frame.lzw = lzw_compress(current, stride, rect, self.minimum_code_size, None);
        if let Some((before, transparent, synthetic)) = substitute {
            let substituted = lzw_compress(
                current,
                stride,
                rect,
                self.minimum_code_size,
                Some((before, transparent)),
            );
            debug!(
                "transparent index {transparent} (synthetic: {synthetic}): {} bytes substituted, {} bytes plain",
                substituted.len(),
                frame.lzw.len()
            );

            // ties keep the plain stream
            if substituted.len() < frame.lzw.len() {
                frame.lzw = substituted;
                if synthetic {
                    frame.set_transparent(Some(transparent));
                }
            }
        }

        debug!(
            "frame rect {:?}, previous frame disposal {:?}, {} bytes",
            rect,
            disposal,
            frame.lzw.len()
        );

        Optimized { frame, patch }
    }

    /// Adds `delay` source ticks to the clock and returns how long, in 1/100 s, the preceding
    /// frame stays up. Rounding is done on the running total so errors never accumulate.
    fn advance_clock(&mut self, delay: u32) -> Option<u16> {
        if delay == 0 {
            return None;
        }

        let ticks = self.total_ticks + u64::from(delay);
        let now = ticks * 100 / u64::from(self.frame_rate);
        let elapsed = now.saturating_sub(self.gif_time);
        self.total_ticks = ticks;
        self.gif_time = now;

        Some(u16::try_from(elapsed).unwrap_or(u16::MAX))
    }
}

/// Smallest rectangle enclosing every pixel that differs between the two buffers. Identical
/// buffers still get a 1x1 rectangle at the origin, since some viewers reject frames without
/// image data.
pub(crate) fn minimum_area(previous: &[u8], current: &[u8], width: u16, height: u16) -> Rect {
    let changed = |(before, now): (&u8, &u8)| before != now;
    let stride = usize::from(width);

    let Some(start) = previous.iter().zip(current).position(changed) else {
        return Rect::new(0, 0, 1, 1);
    };
    let end = previous
        .iter()
        .zip(current)
        .rposition(changed)
        .unwrap_or(start);

    let top = start / stride;
    let bottom = end / stride;
    debug_assert!(bottom < usize::from(height));

    let column_changed = |x: &usize| {
        (top..=bottom).any(|y| previous[y * stride + x] != current[y * stride + x])
    };
    let left = (0..stride).find(column_changed).unwrap_or(stride - 1);
    let right = (0..stride).rev().find(column_changed).unwrap_or(left);

    Rect::new(
        left as u16,
        top as u16,
        (right - left + 1) as u16,
        (bottom - top + 1) as u16,
    )
}

/// Restoring to the background is the only way to turn a pixel transparent once an opaque
/// color has been drawn over it, so it is only chosen when that happens.
pub(crate) fn select_disposal(
    previous: Option<&[u8]>,
    current: &[u8],
    stride: usize,
    rect: Rect,
    transparent: Option<u8>,
) -> DisposalMethod {
    let (Some(previous), Some(transparent)) = (previous, transparent) else {
        return DisposalMethod::DoNotDispose;
    };

    let uncovers = rect.rows(stride).any(|row| {
        previous[row.clone()]
            .iter()
            .zip(&current[row])
            .any(|(&before, &now)| before != transparent && now == transparent)
    });

    if uncovers {
        DisposalMethod::RestoreToBackgroundColor
    } else {
        DisposalMethod::DoNotDispose
    }
}

/// Lowest palette index that none of the changed pixels in `rect` use. Unchanged pixels can
/// then be replaced by it, turning them into long runs of a single code.
pub(crate) fn select_transparent_color(
    previous: &[u8],
    current: &[u8],
    stride: usize,
    rect: Rect,
    palette_len: usize,
) -> Option<u8> {
    let mut used = [0u8; 256 / 8];
    for row in rect.rows(stride) {
        for (&before, &now) in previous[row.clone()].iter().zip(&current[row]) {
            if before != now {
                used[usize::from(now >> 3)] |= 1 << (now & 7);
            }
        }
    }

    let (slot, bits) = used.iter().enumerate().find(|(_, &bits)| bits != 0xff)?;
    let color = (slot << 3) + bits.trailing_ones() as usize;
    (color < palette_len).then_some(color as u8)
}
