use std::fs::File;
use std::io::{self, prelude::*, BufWriter};
use std::path::PathBuf;

use log::{debug, error, info};

use super::frame::EncodedFrame;
use super::optimizer::{FrameOptimizer, Optimized};
use super::queue::FrameQueue;
use super::{EncodeError, EncoderOptions, Rgb, SourceFrame};

const SIGNATURE: &[u8] = b"GIF89a";
const TRAILER_LABEL: u8 = 0x3b;
// application extension, NETSCAPE2.0, one sub-block: loop forever
const NETSCAPE_LOOP: &[u8; 19] = b"\x21\xff\x0bNETSCAPE2.0\x03\x01\x00\x00\x00";

/// Where the finished stream goes. Opened at most once, when the header is written.
pub trait Destination {
    type Sink: Write;

    /// Name used in diagnostics.
    fn describe(&self) -> String;

    fn open(&mut self) -> io::Result<Self::Sink>;
}

#[derive(Debug, Clone)]
pub struct FileDestination {
    path: PathBuf,
}

impl FileDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Destination for FileDestination {
    type Sink = BufWriter<File>;

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&mut self) -> io::Result<Self::Sink> {
        Ok(BufWriter::new(File::create(&self.path)?))
    }
}

/// In-memory destination; [`GifWriter::finish`] hands the filled buffer back.
impl Destination for Vec<u8> {
    type Sink = Vec<u8>;

    fn describe(&self) -> String {
        "memory buffer".into()
    }

    fn open(&mut self) -> io::Result<Self::Sink> {
        Ok(std::mem::take(self))
    }
}

/// Rounds a palette up to a power of two between 2 and 256 entries, padding with a gray
/// ramp. Returns the palette and its size in bits; an empty palette stays empty with 0 bits.
pub fn extend_palette(source: &[Rgb]) -> (Vec<Rgb>, u8) {
    let bits = palette_bits(source.len());
    if bits == 0 {
        return (Vec::new(), 0);
    }
    let len = 1usize << bits;

    let mut palette: Vec<Rgb> = source.iter().take(len).copied().collect();
    let padding = (palette.len()..len).map(|i| Rgb::gray(((i * 255) >> bits) as u8));
    palette.extend(padding);

    (palette, bits)
}

fn palette_bits(len: usize) -> u8 {
    if len == 0 {
        return 0;
    }
    let mut bits = 1u8;
    while (1usize << bits) < len && bits < 8 {
        bits += 1;
    }
    bits
}

/// Number of valid pixel indices. Without a palette any byte goes.
fn index_limit(bits: u8) -> usize {
    if bits == 0 {
        256
    } else {
        1 << bits
    }
}

#[derive(Debug)]
struct LogicalScreen {
    width: u16,
    height: u16,
    palette: Vec<Rgb>,
    palette_bits: u8,
    background_color_index: u8,
}

impl LogicalScreen {
    fn flags(&self) -> u8 {
        if self.palette_bits > 0 {
            // global table present, 8 bits of color resolution, unsorted
            0xf0 | (self.palette_bits - 1)
        } else {
            0
        }
    }
}

/// Encodes a sequence of [`SourceFrame`]s into an animated GIF.
///
/// Nothing reaches the destination until the second frame arrives (or [`GifWriter::finish`]
/// is called on a single frame), because only then is it known whether the stream loops.
/// A failed write is reported once and latches: every later write is skipped, but frames
/// keep being accepted so callers can run to completion.
pub struct GifWriter<D: Destination> {
    destination: D,
    sink: Option<D::Sink>,
    options: EncoderOptions,
    screen: Option<LogicalScreen>,
    optimizer: FrameOptimizer,
    // canvas as a viewer shows it before the next frame
    previous: Option<Vec<u8>>,
    queue: FrameQueue,
    frame_count: usize,
    bytes_written: usize,
    failed: bool,
    error: Option<io::Error>,
}

impl<D: Destination> GifWriter<D> {
    pub fn new(destination: D, options: EncoderOptions) -> Self {
        Self {
            destination,
            sink: None,
            optimizer: FrameOptimizer::new(8, options.default_frame_rate),
            queue: FrameQueue::new(options.queue_capacity),
            options,
            screen: None,
            previous: None,
            frame_count: 0,
            bytes_written: 0,
            failed: false,
            error: None,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Whether a write has failed. Once set, nothing else reaches the destination.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn add_frame(&mut self, source: &SourceFrame) -> Result<(), EncodeError> {
        if source.width == 0 || source.height == 0 || source.pixels.len() != source.area() {
            return Err(EncodeError::FrameSize {
                width: source.width,
                height: source.height,
                actual: source.pixels.len(),
            });
        }

        if let Some(screen) = &self.screen {
            if (screen.width, screen.height) != (source.width, source.height) {
                return Err(EncodeError::CanvasMismatch {
                    width: source.width,
                    height: source.height,
                    canvas_width: screen.width,
                    canvas_height: screen.height,
                });
            }
        }

        let bits = match &self.screen {
            Some(screen) => screen.palette_bits,
            None => palette_bits(source.palette.len()),
        };
        let palette_len = index_limit(bits);
        if let Some(&index) = source
            .pixels
            .iter()
            .find(|&&index| usize::from(index) >= palette_len)
        {
            return Err(EncodeError::IndexOutOfPalette { index, palette_len });
        }

        if self.screen.is_none() {
            self.start(source);
        } else if self.frame_count == 1 {
            // a second frame makes this an animation
            self.write_header(self.options.loop_animation);
        }

        let drop_trailing = self
            .options
            .drop_trailing
            .unwrap_or(usize::from(source.interleave));
        self.queue.set_drop_trailing(drop_trailing);

        let current = source.pixels.clone();
        let has_prior = self.queue.len() > 0;
        let Optimized { frame, patch } =
            self.optimizer.optimize(self.previous.as_mut(), source, has_prior);

        if let (Some(patch), Some(pending)) = (patch, self.queue.most_recent_mut()) {
            patch.apply(pending);
        }
        if let Some(evicted) = self.queue.enqueue(frame) {
            self.write_frame(&evicted);
        }

        self.previous = Some(current);
        self.frame_count += 1;
        Ok(())
    }

    /// Completes the stream: writes the header of a still image, the remaining queued frames
    /// and the trailer.
    ///
    /// Returns the sink on success, `None` if no frame was ever added (the destination is
    /// never opened then), or the write error that stopped the stream.
    pub fn finish(mut self) -> Result<Option<D::Sink>, EncodeError> {
        if self.frame_count == 1 {
            self.write_header(false);
        }

        if self.sink.is_some() {
            let remaining: Vec<EncodedFrame> = self.queue.flush().collect();
            for frame in &remaining {
                self.write_frame(frame);
            }
            self.write_with(|sink| {
                sink.write_all(&[TRAILER_LABEL])?;
                sink.flush()
            });
            self.bytes_written += 1;
        }

        if let Some(source) = self.error.take() {
            return Err(EncodeError::Write {
                destination: self.destination.describe(),
                source,
            });
        }

        info!(
            "encoded {} frames, {} bytes to {}",
            self.frame_count,
            self.bytes_written,
            self.destination.describe()
        );
        Ok(self.sink.take())
    }

    fn start(&mut self, source: &SourceFrame) {
        let (palette, palette_bits) = extend_palette(&source.palette);
        info!(
            "{}x{} canvas, {} palette entries ({} bits)",
            source.width,
            source.height,
            palette.len(),
            palette_bits
        );

        // A transparent first frame makes its transparent color the background, and the
        // canvas starts out cleared to it.
        let background_color_index = match source.transparent {
            Some(transparent) => {
                self.previous = Some(vec![transparent; source.area()]);
                transparent
            }
            None => 0,
        };

        self.optimizer = FrameOptimizer::new(palette_bits, self.options.default_frame_rate);
        self.screen = Some(LogicalScreen {
            width: source.width,
            height: source.height,
            palette,
            palette_bits,
            background_color_index,
        });
    }

    fn write_header(&mut self, looping: bool) {
        let Some(screen) = &self.screen else {
            return;
        };

        let mut header = Vec::with_capacity(SIGNATURE.len() + 7 + screen.palette.len() * 3 + 19);
        header.extend_from_slice(SIGNATURE);
        header.extend_from_slice(&screen.width.to_le_bytes());
        header.extend_from_slice(&screen.height.to_le_bytes());
        header.push(screen.flags());
        header.push(screen.background_color_index);
        // pixel aspect ratio
        header.push(0);
        for color in &screen.palette {
            header.extend_from_slice(&[color.red, color.green, color.blue]);
        }
        if looping {
            header.extend_from_slice(NETSCAPE_LOOP);
        }
        info!(
            "writing {} header to {}",
            if looping { "looping animation" } else { "still image" },
            self.destination.describe()
        );

        match self.destination.open() {
            Ok(sink) => self.sink = Some(sink),
            Err(err) => {
                self.fail(err);
                return;
            }
        }
        self.write_with(|sink| sink.write_all(&header));
        self.bytes_written += header.len();
    }

    fn write_frame(&mut self, frame: &EncodedFrame) {
        debug!(
            "writing frame at {:?}, delay {}, disposal {:?}, transparent {:?}",
            frame.rect,
            frame.delay(),
            frame.disposal(),
            frame.transparent()
        );
        let mut bytes = Vec::with_capacity(frame.encoded_len());
        frame.encode(&mut bytes);
        self.write_with(|sink| sink.write_all(&bytes));
        self.bytes_written += bytes.len();
    }

    /// Runs `op` against the open sink. Without a sink this silently does nothing.
    fn write_with(&mut self, op: impl FnOnce(&mut D::Sink) -> io::Result<()>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(err) = op(sink) {
            self.fail(err);
        }
    }

    fn fail(&mut self, err: io::Error) {
        error!("could not write to {}: {}", self.destination.describe(), err);
        self.failed = true;
        self.sink = None;
        self.error.get_or_insert(err);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::encoder::DisposalMethod;
    use crate::parser::{Compositor, Decoder};

    fn gray_palette(len: usize) -> Vec<Rgb> {
        (0..len).map(|i| Rgb::gray(i as u8)).collect()
    }

    fn encode(frames: &[SourceFrame], options: EncoderOptions) -> Vec<u8> {
        let mut writer = GifWriter::new(Vec::new(), options);
        for frame in frames {
            writer.add_frame(frame).unwrap();
        }
        writer.finish().unwrap().unwrap()
    }

    fn decode(bytes: &[u8]) -> Decoder<&[u8]> {
        let mut decoder = Decoder::new(bytes);
        decoder.parse().unwrap();
        decoder
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn palette_is_rounded_up_with_a_gray_ramp() {
        let (palette, bits) = extend_palette(&[Rgb::new(255, 0, 0); 5]);
        assert_eq!(bits, 3);
        assert_eq!(palette.len(), 8);
        assert_eq!(palette[4], Rgb::new(255, 0, 0));
        assert_eq!(palette[5], Rgb::gray((5 * 255 >> 3) as u8));
        assert_eq!(palette[7], Rgb::gray((7 * 255 >> 3) as u8));

        assert_eq!(extend_palette(&[Rgb::default()]).1, 1);
        assert_eq!(extend_palette(&gray_palette(256)).1, 8);
        assert_eq!(extend_palette(&gray_palette(300)).0.len(), 256);
        assert_eq!(extend_palette(&[]), (Vec::new(), 0));
    }

    #[test]
    fn single_still_frame() {
        let frame = SourceFrame::new(3, 2, vec![0, 1, 2, 2, 1, 0], gray_palette(3));
        let bytes = encode(&[frame], EncoderOptions::default());

        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(&bytes[6..13], [3, 0, 2, 0, 0xf1, 0, 0]);
        // 4 palette entries follow, then straight to the image
        assert_eq!(bytes[13 + 12], 0x2c);
        assert_eq!(count(&bytes, &[0x21, 0xf9]), 0);
        assert_eq!(count(&bytes, b"NETSCAPE2.0"), 0);
        assert_eq!(*bytes.last().unwrap(), 0x3b);

        let decoder = decode(&bytes);
        assert_eq!(decoder.graphic_blocks.len(), 1);
        assert!(decoder.loop_count().is_none());
    }

    #[test]
    fn four_color_palette_uses_two_bit_codes() {
        let frame = SourceFrame::new(2, 2, vec![0, 1, 2, 3], gray_palette(4));
        let bytes = encode(&[frame], EncoderOptions::default());

        // global table flag, color resolution 7, size field 1
        assert_eq!(bytes[10], 0xf1);
        let image = 13 + 4 * 3;
        assert_eq!(bytes[image], 0x2c);
        // minimum code size right after the 10 byte descriptor
        assert_eq!(bytes[image + 10], 2);

        let decoder = decode(&bytes);
        assert_eq!(decoder.global_color_table.as_ref().map(|t| t.len()), Some(12));
    }

    #[test]
    fn identical_second_frame_is_one_pixel() {
        let pixels: Vec<u8> = (0..16).map(|i| (i % 4) as u8).collect();
        let frame = SourceFrame::new(4, 4, pixels.clone(), gray_palette(4));
        let bytes = encode(&[frame.clone(), frame], EncoderOptions::default());

        assert_eq!(count(&bytes, b"NETSCAPE2.0"), 1);
        let decoder = decode(&bytes);
        assert_eq!(decoder.loop_count(), Some(0));
        assert_eq!(decoder.graphic_blocks.len(), 2);
        let second = &decoder.graphic_blocks[1].render_block;
        assert_eq!((second.width, second.height), (1, 1));

        let rendered: Vec<SourceFrame> = Compositor::new(&decoder).collect();
        assert_eq!(rendered.len(), 2);
        assert!(rendered.iter().all(|frame| frame.pixels == pixels));
    }

    #[test]
    fn animation_round_trips_through_the_decoder() {
        let width = 24u16;
        let height = 16u16;
        let frames: Vec<SourceFrame> = (0..6u32)
            .map(|step| {
                let pixels = (0..u32::from(width) * u32::from(height))
                    .map(|i| {
                        let (x, y) = (i % u32::from(width), i / u32::from(width));
                        if x / 4 == step && y > 3 {
                            7
                        } else {
                            ((x + y) % 5) as u8
                        }
                    })
                    .collect();
                SourceFrame::new(width, height, pixels, gray_palette(8)).with_timing(5, 50)
            })
            .collect();

        let bytes = encode(&frames, EncoderOptions::default());
        let decoder = decode(&bytes);
        let rendered: Vec<SourceFrame> = Compositor::new(&decoder).collect();

        assert_eq!(rendered.len(), frames.len());
        for (expected, actual) in frames.iter().zip(&rendered) {
            assert_eq!(expected.pixels, actual.pixels);
        }
        // every frame but the last was patched with 5 ticks at 50 Hz
        for block in &decoder.graphic_blocks[..5] {
            assert_eq!(block.extension.map(|gce| gce.delay_time), Some(10));
        }
    }

    #[test]
    fn transparency_without_uncovering_keeps_frames() {
        let first = SourceFrame::new(2, 2, vec![0, 1, 1, 1], gray_palette(4)).with_transparent(0);
        let second = SourceFrame::new(2, 2, vec![0, 2, 1, 1], gray_palette(4)).with_transparent(0);
        let bytes = encode(&[first, second], EncoderOptions::default());

        // transparent first frame: its color becomes the background
        assert_eq!(bytes[11], 0);
        let decoder = decode(&bytes);
        let first = decoder.graphic_blocks[0].extension.unwrap();
        assert_eq!(
            DisposalMethod::from_u8(first.disposal_method),
            Some(DisposalMethod::DoNotDispose)
        );
        assert!(first.transparent_color_flag);
    }

    #[test]
    fn uncovering_a_pixel_restores_the_background() {
        let first = SourceFrame::new(2, 2, vec![3, 1, 1, 1], gray_palette(4)).with_transparent(3);
        let second = SourceFrame::new(2, 2, vec![3, 3, 1, 1], gray_palette(4)).with_transparent(3);
        let bytes = encode(&[first, second], EncoderOptions::default());

        assert_eq!(bytes[11], 3);
        let decoder = decode(&bytes);
        let first = decoder.graphic_blocks[0].extension.unwrap();
        assert_eq!(
            DisposalMethod::from_u8(first.disposal_method),
            Some(DisposalMethod::RestoreToBackgroundColor)
        );
        let rendered: Vec<SourceFrame> = Compositor::new(&decoder).collect();
        assert_eq!(rendered[1].pixels, [3, 3, 1, 1]);
    }

    #[test]
    fn trailing_frames_are_dropped() {
        let frames: Vec<SourceFrame> = (0..5u8)
            .map(|i| SourceFrame::new(1, 1, vec![i], gray_palette(8)).with_interleave(2))
            .collect();
        let bytes = encode(&frames, EncoderOptions::default());
        assert_eq!(decode(&bytes).graphic_blocks.len(), 3);

        let options = EncoderOptions {
            drop_trailing: Some(0),
            ..Default::default()
        };
        assert_eq!(decode(&encode(&frames, options)).graphic_blocks.len(), 5);
    }

    #[test]
    fn no_loop_extension_when_disabled() {
        let frame = SourceFrame::new(1, 1, vec![0], gray_palette(2));
        let options = EncoderOptions {
            loop_animation: false,
            ..Default::default()
        };
        let bytes = encode(&[frame.clone(), frame], options);
        assert_eq!(count(&bytes, b"NETSCAPE2.0"), 0);
        assert_eq!(decode(&bytes).graphic_blocks.len(), 2);
    }

    #[test]
    fn nothing_is_opened_without_frames() {
        let writer = GifWriter::new(Vec::new(), EncoderOptions::default());
        assert!(writer.finish().unwrap().is_none());
    }

    #[test]
    fn rejects_bad_frames() {
        let mut writer = GifWriter::new(Vec::new(), EncoderOptions::default());
        let short = SourceFrame::new(2, 2, vec![0; 3], gray_palette(2));
        assert!(matches!(
            writer.add_frame(&short),
            Err(EncodeError::FrameSize { actual: 3, .. })
        ));

        writer
            .add_frame(&SourceFrame::new(2, 2, vec![0; 4], gray_palette(2)))
            .unwrap();
        let wider = SourceFrame::new(3, 2, vec![0; 6], gray_palette(2));
        assert!(matches!(
            writer.add_frame(&wider),
            Err(EncodeError::CanvasMismatch { canvas_width: 2, .. })
        ));
        assert_eq!(writer.frame_count(), 1);
    }

    #[test]
    fn rejects_indices_outside_the_palette() {
        let mut writer = GifWriter::new(Vec::new(), EncoderOptions::default());
        let first = SourceFrame::new(2, 1, vec![200, 1], gray_palette(4));
        assert!(matches!(
            writer.add_frame(&first),
            Err(EncodeError::IndexOutOfPalette {
                index: 200,
                palette_len: 4
            })
        ));
        // a rejected first frame does not fix the canvas
        assert_eq!(writer.frame_count(), 0);

        writer
            .add_frame(&SourceFrame::new(2, 1, vec![3, 1], gray_palette(3)))
            .unwrap();
        // later frames are checked against the palette of the first
        let later = SourceFrame::new(2, 1, vec![0, 4], gray_palette(256));
        assert!(matches!(
            writer.add_frame(&later),
            Err(EncodeError::IndexOutOfPalette { index: 4, .. })
        ));

        let bytes = writer.finish().unwrap().unwrap();
        let decoder = decode(&bytes);
        assert_eq!(decoder.graphic_blocks[0].indicies(), [3, 1]);

        // no palette at all takes any index, with 8 bit codes
        let bare = SourceFrame::new(2, 1, vec![255, 0], Vec::new());
        let bytes = encode(&[bare], EncoderOptions::default());
        assert_eq!(decode(&bytes).graphic_blocks[0].indicies(), [255, 0]);
    }

    /// Accepts writes while they fit in `budget`, fails the ones that do not.
    #[derive(Debug)]
    struct Flaky {
        budget: usize,
        written: Rc<RefCell<Vec<u8>>>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out a [`Flaky`] sink whose bytes stay visible through `written`.
    #[derive(Default)]
    struct FlakyDestination {
        budget: Option<usize>,
        written: Rc<RefCell<Vec<u8>>>,
    }

    impl Destination for FlakyDestination {
        type Sink = Flaky;

        fn describe(&self) -> String {
            "flaky".into()
        }

        fn open(&mut self) -> io::Result<Flaky> {
            match self.budget {
                Some(budget) => Ok(Flaky {
                    budget,
                    written: Rc::clone(&self.written),
                }),
                None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "read only")),
            }
        }
    }

    fn noisy_frames(count: u8) -> Vec<SourceFrame> {
        (0..count)
            .map(|step| {
                let pixels = (0..64u32)
                    .map(|i| ((i * 7 + u32::from(step) * 3) % 16) as u8)
                    .collect();
                SourceFrame::new(8, 8, pixels, gray_palette(16))
            })
            .collect()
    }

    #[test]
    fn write_failure_latches_and_the_pipeline_keeps_going() {
        let written = Rc::new(RefCell::new(Vec::new()));
        // room for the 80 byte header, not for the first frame
        let destination = FlakyDestination {
            budget: Some(100),
            written: Rc::clone(&written),
        };
        let mut writer = GifWriter::new(
            destination,
            EncoderOptions {
                queue_capacity: 1,
                ..Default::default()
            },
        );

        let mut frames = noisy_frames(6).into_iter();
        for frame in frames.by_ref().take(2) {
            writer.add_frame(&frame).unwrap();
        }
        assert!(writer.failed());
        let len_at_failure = written.borrow().len();
        assert_eq!(len_at_failure, 80);

        // the sink still has room for small writes, but nothing reaches it
        for frame in frames {
            writer.add_frame(&frame).unwrap();
            assert_eq!(written.borrow().len(), len_at_failure);
        }
        assert_eq!(writer.frame_count(), 6);

        match writer.finish() {
            Err(EncodeError::Write {
                destination,
                source,
            }) => {
                assert_eq!(destination, "flaky");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("expected a write error, got {other:?}"),
        }
        // no trailer either
        assert_eq!(written.borrow().len(), len_at_failure);
        assert_ne!(written.borrow().last(), Some(&0x3b));
    }

    #[test]
    fn open_failure_is_reported() {
        let mut writer = GifWriter::new(FlakyDestination::default(), EncoderOptions::default());
        for frame in noisy_frames(3) {
            writer.add_frame(&frame).unwrap();
        }
        assert!(writer.failed());
        assert!(matches!(
            writer.finish(),
            Err(EncodeError::Write { source, .. }) if source.kind() == io::ErrorKind::PermissionDenied
        ));
    }

    #[test]
    fn file_destination_writes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gif");

        let mut writer = GifWriter::new(FileDestination::new(&path), EncoderOptions::default());
        for frame in noisy_frames(3) {
            writer.add_frame(&frame).unwrap();
        }
        assert!(writer.finish().unwrap().is_some());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(decode(&bytes).graphic_blocks.len(), 3);
    }
}
