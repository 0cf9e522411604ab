use std::io::Read;

use log::warn;

use super::decoder::{Decoder, GraphicBlock};
use crate::encoder::{DisposalMethod, Rect, Rgb, SourceFrame};

/// GIF delays are in hundredths of a second.
const TICK_RATE: u32 = 100;

/// Plays back parsed frames onto a full canvas, yielding what a viewer would show after each
/// image as a [`SourceFrame`].
///
/// The canvas starts out as the first frame's transparent color if it has one, otherwise as
/// the background color, and that same color is used when a frame is restored to the
/// background.
///
/// All frames share one palette: the global color table followed by the colors of every
/// local table that are not in it yet, up to 256 entries. Indices of frames with a local
/// table are remapped into it, falling back to the nearest color once it is full.
pub struct Compositor<'a> {
    blocks: &'a [GraphicBlock],
    width: u16,
    height: u16,
    palette: Vec<Rgb>,
    background: u8,
    transparent: Option<u8>,
    canvas: Vec<u8>,
    // disposal of the frame shown last, applied before drawing the next one
    pending: Option<(DisposalMethod, Rect)>,
    saved: Option<Vec<u8>>,
    warned_approximation: bool,
}

impl<'a> Compositor<'a> {
    pub fn new<R: Read>(decoder: &'a Decoder<R>) -> Self {
        let blocks = decoder.frames();
        let (width, height, background_color_index) = decoder
            .screen()
            .map(|screen| {
                (
                    screen.screen_width,
                    screen.screen_height,
                    screen.background_color_index,
                )
            })
            .unwrap_or_default();

        let palette = shared_palette(decoder.global_color_table(), blocks);

        let transparent = blocks.first().and_then(|first| {
            let index = first.extension()?.transparent()?;
            match first.local_color_table() {
                Some(table) => color_map(table, &palette)
                    .0
                    .get(usize::from(index))
                    .copied(),
                None => Some(index),
            }
        });
        let background = transparent.unwrap_or(background_color_index);

        Self {
            blocks,
            width,
            height,
            palette,
            background,
            transparent,
            canvas: vec![background; usize::from(width) * usize::from(height)],
            pending: None,
            saved: None,
            warned_approximation: false,
        }
    }

    fn dispose(&mut self) {
        match self.pending.take() {
            Some((DisposalMethod::RestoreToBackgroundColor, rect)) => {
                for row in self.clip(rect).rows(usize::from(self.width)) {
                    self.canvas[row].fill(self.background);
                }
            }
            Some((DisposalMethod::RestoreToPrevious, _)) => {
                if let Some(saved) = self.saved.take() {
                    self.canvas = saved;
                }
            }
            _ => {}
        }
    }

    fn clip(&self, rect: Rect) -> Rect {
        let left = rect.left.min(self.width);
        let top = rect.top.min(self.height);
        Rect::new(
            left,
            top,
            rect.width.min(self.width - left),
            rect.height.min(self.height - top),
        )
    }

    fn draw(
        &mut self,
        block: &GraphicBlock,
        rect: Rect,
        transparent: Option<u8>,
        colors: Option<&[u8]>,
    ) {
        let visible = self.clip(rect);
        let stride = usize::from(self.width);
        let source_width = usize::from(rect.width);

        for (y, row) in visible.rows(stride).enumerate() {
            let start = y * source_width;
            let Some(source) = block.indicies().get(start..start + row.len()) else {
                break;
            };
            for (dest, &index) in self.canvas[row].iter_mut().zip(source) {
                if Some(index) != transparent {
                    *dest = match colors {
                        Some(colors) => colors.get(usize::from(index)).copied().unwrap_or(index),
                        None => index,
                    };
                }
            }
        }
    }
}

impl Iterator for Compositor<'_> {
    type Item = SourceFrame;

    fn next(&mut self) -> Option<SourceFrame> {
        let blocks = self.blocks;
        let (block, rest) = blocks.split_first()?;
        self.blocks = rest;

        self.dispose();

        let colors = block.local_color_table().map(|table| {
            let (colors, approximated) = color_map(table, &self.palette);
            if approximated && !self.warned_approximation {
                warn!("more than 256 colors in use, some are replaced by the nearest one");
                self.warned_approximation = true;
            }
            colors
        });

        let image = &block.render_block;
        let rect = Rect::new(
            image.left_position,
            image.top_position,
            image.width,
            image.height,
        );
        let gce = block.extension();
        let disposal = gce
            .and_then(|gce| DisposalMethod::from_u8(gce.disposal_method))
            .unwrap_or_default();

        if disposal == DisposalMethod::RestoreToPrevious {
            self.saved = Some(self.canvas.clone());
        }
        self.draw(
            block,
            rect,
            gce.and_then(|gce| gce.transparent()),
            colors.as_deref(),
        );
        self.pending = Some((disposal, rect));

        let delay = gce.map(|gce| gce.delay_time()).unwrap_or_default();
        let mut frame = SourceFrame::new(
            self.width,
            self.height,
            self.canvas.clone(),
            self.palette.clone(),
        )
        .with_timing(u32::from(delay), TICK_RATE);
        frame.transparent = self.transparent;
        Some(frame)
    }
}

fn to_palette(table: &[u8]) -> Vec<Rgb> {
    table
        .chunks_exact(3)
        .map(|rgb| Rgb::new(rgb[0], rgb[1], rgb[2]))
        .collect()
}

fn shared_palette(global: Option<&[u8]>, blocks: &[GraphicBlock]) -> Vec<Rgb> {
    let mut palette = global.map(to_palette).unwrap_or_default();
    for table in blocks.iter().filter_map(GraphicBlock::local_color_table) {
        for color in to_palette(table) {
            if palette.len() == 256 {
                break;
            }
            if !palette.contains(&color) {
                palette.push(color);
            }
        }
    }

    if palette.is_empty() {
        palette = (0..=255).map(Rgb::gray).collect();
    }
    palette
}

/// Index in `palette` of every color of a local table. Also tells whether any color had to
/// be replaced by its nearest match.
fn color_map(table: &[u8], palette: &[Rgb]) -> (Vec<u8>, bool) {
    let mut approximated = false;
    let colors: Vec<u8> = to_palette(table)
        .into_iter()
        .map(|color| {
            let exact = palette.iter().position(|&entry| entry == color);
            let index = exact.unwrap_or_else(|| {
                approximated = true;
                nearest(color, palette)
            });
            index as u8
        })
        .collect();
    (colors, approximated)
}

fn nearest(color: Rgb, palette: &[Rgb]) -> usize {
    let distance = |entry: &Rgb| {
        let channel = |a: u8, b: u8| (i32::from(a) - i32::from(b)).pow(2);
        channel(color.red, entry.red)
            + channel(color.green, entry.green)
            + channel(color.blue, entry.blue)
    };
    palette
        .iter()
        .enumerate()
        .min_by_key(|(_, entry)| distance(entry))
        .map(|(index, _)| index)
        .unwrap_or_default()
}
