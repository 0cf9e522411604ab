use super::lzw;
use super::ParserError;

use anyhow::Result;
use log::debug;

use std::io::prelude::*;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_DESCRIPTOR_LABEL: u8 = 0x2c;
const TRAILER_LABEL: u8 = 0x3b;

// Extension labels
const APPLICATION_EXTENSION: u8 = 0xff;
const COMMENT_EXTENSION: u8 = 0xfe;
const GRAPHIC_CONTROL_EXTENSION: u8 = 0xf9;
const PLAIN_TEXT_EXTENSION: u8 = 0x01;

#[derive(Debug)]
enum ExtensionType {
    Application,
    Comment,
    GraphicControl,
    PlainText,
}

impl TryFrom<u8> for ExtensionType {
    type Error = ParserError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        use ExtensionType::*;

        match value {
            APPLICATION_EXTENSION => Ok(Application),
            COMMENT_EXTENSION => Ok(Comment),
            GRAPHIC_CONTROL_EXTENSION => Ok(GraphicControl),
            PLAIN_TEXT_EXTENSION => Ok(PlainText),

            _ => Err(ParserError::InvalidExtensionLabel(value)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GraphicControlExtension {
    pub(crate) disposal_method: u8,
    pub(crate) transparent_color_flag: bool,

    pub(crate) delay_time: u16,
    pub(crate) transparent_color_index: u8,
}

impl GraphicControlExtension {
    pub fn transparent(&self) -> Option<u8> {
        self.transparent_color_flag
            .then_some(self.transparent_color_index)
    }

    /// Delay in 1/100 s.
    pub fn delay_time(&self) -> u16 {
        self.delay_time
    }
}

#[derive(Debug)]
pub struct TableBasedImage {
    // includes image descriptor inline
    pub(crate) left_position: u16,
    pub(crate) top_position: u16,

    pub(crate) width: u16,
    pub(crate) height: u16,

    pub(crate) interlace_flag: bool,
    pub(crate) local_color_table_size: Option<usize>,

    pub(crate) local_color_table: Option<Box<[u8]>>,

    pub(crate) image_indexes: Option<Box<[u8]>>,
}

#[derive(Debug)]
pub struct GraphicBlock {
    pub(crate) extension: Option<GraphicControlExtension>,
    pub(crate) render_block: TableBasedImage,
}

impl GraphicBlock {
    pub fn extension(&self) -> Option<&GraphicControlExtension> {
        self.extension.as_ref()
    }

    pub fn indicies(&self) -> &[u8] {
        self.render_block.image_indexes.as_deref().unwrap_or_default()
    }

    pub fn local_color_table(&self) -> Option<&[u8]> {
        self.render_block.local_color_table.as_deref()
    }
}

#[derive(Debug)]
pub(crate) enum Version {
    V87a,
    V89a,
}

impl TryFrom<&str> for Version {
    type Error = ParserError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "87a" => Ok(Version::V87a),
            "89a" => Ok(Version::V89a),
            version => Err(ParserError::UnsupportedVersion(version.into())),
        }
    }
}

#[derive(Debug)]
enum LoopCount {
    Infinite,
    Number(u16),
}

#[derive(Debug)]
pub struct LogicalScreenDescriptor {
    pub(crate) screen_width: u16,
    pub(crate) screen_height: u16,
    pub(crate) global_color_table_size: Option<usize>,
    pub(crate) background_color_index: u8,
}

/// Byte length of the color table announced by an image or screen descriptor.
fn color_table_size(packed_fields: u8) -> Option<usize> {
    const COLOR_TABLE_FLAG: u8 = 0b1000_0000;
    (packed_fields & COLOR_TABLE_FLAG != 0).then(|| 3 << ((packed_fields & 0b111) + 1))
}

#[derive(Debug)]
pub(crate) enum ParserState {
    ProcessMagic,
    ProcessLogicalScreenDescriptor,
    ProcessGlobalColorTable,
    ProcessTrailer,

    DetermineNextBlock(Option<GraphicControlExtension>),
    ProcessExtension(u8),
    ProcessImageDescriptor(Option<GraphicControlExtension>),
    ProcessLocalColorTable(GraphicBlock),
    ProcessImageData(GraphicBlock),

    Done,
}

#[derive(Debug)]
pub struct Decoder<R: Read> {
    inner: R,
    pub(crate) logical_screen_descriptor: Option<LogicalScreenDescriptor>,
    pub(crate) global_color_table: Option<Box<[u8]>>,
    pub(crate) graphic_blocks: Vec<GraphicBlock>,
    loop_count: Option<LoopCount>,
}

impl<R: Read> Decoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            logical_screen_descriptor: None,
            global_color_table: None,
            graphic_blocks: Vec::new(),
            loop_count: None,
        }
    }

    pub fn parse(&mut self) -> Result<()> {
        let mut state = ParserState::ProcessMagic;

        loop {
            debug!("begin parsing state {:?}", state);

            state = self.process_next_state(state)?;
            if let ParserState::Done = state {
                break Ok(());
            }
        }
    }

    pub fn frames(&self) -> &[GraphicBlock] {
        &self.graphic_blocks
    }

    pub fn screen(&self) -> Option<&LogicalScreenDescriptor> {
        self.logical_screen_descriptor.as_ref()
    }

    pub fn global_color_table(&self) -> Option<&[u8]> {
        self.global_color_table.as_deref()
    }

    /// Loop count from the Netscape extension, 0 meaning forever.
    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count.as_ref().map(|count| match count {
            LoopCount::Infinite => 0,
            LoopCount::Number(number) => *number,
        })
    }

    fn process_next_state(&mut self, next_state: ParserState) -> Result<ParserState> {
        use ParserState::*;

        match next_state {
            ProcessMagic => {
                let signature = self.read_str(3)?;
                if signature.as_ref() != "GIF" {
                    return Err(ParserError::InvalidSignature.into());
                }
                debug!("processed signature, got GIF");

                let version = Version::try_from(self.read_str(3)?.as_ref())?;
                debug!("processed version, got {:?}", version);

                Ok(ProcessLogicalScreenDescriptor)
            }
            ProcessLogicalScreenDescriptor => {
                let screen_width = self.read_u16()?;
                let screen_height = self.read_u16()?;

                // color resolution and sort flag are of no use here
                let global_color_table_size = color_table_size(self.read_byte()?);
                let background_color_index = self.read_byte()?;
                // pixel aspect ratio
                self.read_byte()?;

                self.logical_screen_descriptor = Some(LogicalScreenDescriptor {
                    screen_width,
                    screen_height,
                    global_color_table_size,
                    background_color_index,
                });

                debug!(
                    "processed logical screen descriptor, got: {:#?}",
                    self.logical_screen_descriptor
                );

                Ok(match global_color_table_size {
                    Some(_) => ProcessGlobalColorTable,
                    None => DetermineNextBlock(None),
                })
            }
            ProcessGlobalColorTable => {
                let size = self
                    .logical_screen_descriptor
                    .as_ref()
                    .and_then(|screen| screen.global_color_table_size)
                    .unwrap_or_default();

                self.global_color_table = Some(self.read_bytes(size)?);
                debug!("processed global color table of {size} bytes");

                Ok(DetermineNextBlock(None))
            }
            ProcessTrailer => Ok(Done),
            DetermineNextBlock(graphic_control_extension) => {
                let introducer_or_label = self.read_byte()?;

                match introducer_or_label {
                    // extension introducer means that a label follows determining what exact type
                    // of extension it is.
                    EXTENSION_INTRODUCER => Ok(ProcessExtension(self.read_byte()?)),
                    IMAGE_DESCRIPTOR_LABEL => {
                        Ok(ProcessImageDescriptor(graphic_control_extension))
                    }
                    TRAILER_LABEL => Ok(ProcessTrailer),
                    label => Err(ParserError::UnexpectedLabel(label).into()),
                }
            }
            ProcessExtension(label) => self.process_extension(ExtensionType::try_from(label)?),
            ProcessImageDescriptor(graphic_control_extension) => {
                let left_position = self.read_u16()?;
                let top_position = self.read_u16()?;

                let width = self.read_u16()?;
                let height = self.read_u16()?;

                let packed_fields = self.read_byte()?;
                let interlace_flag = packed_fields & 0b0100_0000 != 0;
                let local_color_table_size = color_table_size(packed_fields);

                let graphic_block = GraphicBlock {
                    extension: graphic_control_extension,
                    render_block: TableBasedImage {
                        left_position,
                        top_position,
                        width,
                        height,
                        interlace_flag,
                        local_color_table_size,

                        local_color_table: None,
                        image_indexes: None,
                    },
                };

                Ok(match local_color_table_size {
                    Some(_) => ProcessLocalColorTable(graphic_block),
                    None => ProcessImageData(graphic_block),
                })
            }
            ProcessLocalColorTable(mut graphic_block) => {
                let size = graphic_block
                    .render_block
                    .local_color_table_size
                    .unwrap_or_default();

                graphic_block.render_block.local_color_table = Some(self.read_bytes(size)?);

                Ok(ProcessImageData(graphic_block))
            }
            ProcessImageData(mut graphic_block) => {
                let lzw_code_size = self.read_byte()?;
                let data_stream = self.read_data_sub_blocks()?;

                let image = &graphic_block.render_block;
                let pixel_count = usize::from(image.width) * usize::from(image.height);

                let mut indicies = lzw::lzw_decode(&data_stream, lzw_code_size)?;
                if indicies.len() != pixel_count {
                    debug!(
                        "image data holds {} indices, expected {pixel_count}",
                        indicies.len()
                    );
                    indicies.resize(pixel_count, 0);
                }
                if image.interlace_flag {
                    indicies = deinterlace(&indicies, usize::from(image.width));
                }
                graphic_block.render_block.image_indexes = Some(indicies.into_boxed_slice());

                self.graphic_blocks.push(graphic_block);

                Ok(DetermineNextBlock(None))
            }
            Done => Ok(Done),
        }
    }

    fn process_extension(&mut self, label: ExtensionType) -> Result<ParserState> {
        use ExtensionType::*;

        debug!("processing extension type: {:?}", label);
        match label {
            Application => {
                self.expect_block_size(11)?;
                let identifier = self.read_str(8)?;
                let authentication_code = self.read_bytes(3)?;
                let data = self.read_data_sub_blocks()?;
                debug!(
                    "processed application block {identifier}, {} bytes of data",
                    data.len()
                );

                // other applications are skipped
                if identifier.as_ref() == "NETSCAPE" && authentication_code.as_ref() == b"2.0" {
                    let [1, lo, hi] = data.as_ref() else {
                        return Err(ParserError::UnexpectedApplicationDescriptorDataLength {
                            name: identifier.into(),
                            expected: 3,
                            actual: data.len(),
                        }
                        .into());
                    };

                    self.loop_count = Some(match u16::from_le_bytes([*lo, *hi]) {
                        0 => LoopCount::Infinite,
                        number => LoopCount::Number(number),
                    });
                }
                Ok(ParserState::DetermineNextBlock(None))
            }
            Comment => {
                let data = self.read_data_sub_blocks()?;
                debug!("skipped comment: {}", String::from_utf8_lossy(&data));
                Ok(ParserState::DetermineNextBlock(None))
            }
            GraphicControl => {
                self.expect_block_size(4)?;

                // 000 DDD U T: disposal, user input (ignored), transparent color
                let packed_fields = self.read_byte()?;
                let disposal_method = (packed_fields >> 2) & 0b111;
                let transparent_color_flag = packed_fields & 1 != 0;

                let delay_time = self.read_u16()?;
                let transparent_color_index = self.read_byte()?;

                let block_terminator = self.read_byte()?;
                if block_terminator != 0 {
                    return Err(ParserError::MissingBlockTerminator.into());
                }

                let graphic_control_extension = GraphicControlExtension {
                    disposal_method,
                    transparent_color_flag,
                    delay_time,
                    transparent_color_index,
                };

                debug!(
                    "processed GraphicControlExtension: {:#?}",
                    graphic_control_extension
                );

                Ok(ParserState::DetermineNextBlock(Some(
                    graphic_control_extension,
                )))
            }
            PlainText => {
                // rendered text is not supported, skip it
                self.expect_block_size(12)?;
                self.read_bytes(12)?;
                self.read_data_sub_blocks()?;

                Ok(ParserState::DetermineNextBlock(None))
            }
        }
    }

    fn expect_block_size(&mut self, expected: u8) -> Result<()> {
        let actual = self.read_byte()?;
        if actual != expected {
            return Err(ParserError::UnexpectedBlockSize { expected, actual }.into());
        }
        Ok(())
    }

    fn read_bytes(&mut self, count: usize) -> Result<Box<[u8]>> {
        let mut buffer = vec![0; count];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer.into_boxed_slice())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer: [u8; 1] = [0; 1];
        self.inner.read_exact(&mut buffer)?;
        Ok(u8::from_le_bytes(buffer))
    }

    fn read_u16(&mut self) -> Result<u16> {
        // GIF89a: Unless otherwise stated, multi-byte numeric fields are ordered with the Least
        // Significant Byte first.

        let mut buffer: [u8; 2] = [0; 2];
        self.inner.read_exact(&mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    fn read_str(&mut self, count: usize) -> Result<Box<str>> {
        let buffer = self.read_bytes(count)?;
        Ok(String::from_utf8(buffer.into_vec())?.into_boxed_str())
    }

    fn read_data_sub_blocks(&mut self) -> Result<Box<[u8]>> {
        let mut block_size = self.read_byte()?;

        // there could be more than one block, but we do know we'll at least have 1 sub-block.
        // allocate capacity to account for it.
        let mut result = Vec::with_capacity(block_size.into());

        // we might have read the block terminator at the end of the while loop, stop right there
        // because we're done.
        while block_size != 0 {
            let start = result.len();
            result.resize(start + usize::from(block_size), 0);
            self.inner.read_exact(&mut result[start..])?;

            block_size = self.read_byte()?;
        }

        Ok(result.into_boxed_slice())
    }
}

/// Reorders rows stored in the four interlace passes back into top-to-bottom order.
fn deinterlace(indicies: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return indicies.to_vec();
    }
    let height = indicies.len() / width;
    let order = (0..height)
        .step_by(8)
        .chain((4..height).step_by(8))
        .chain((2..height).step_by(4))
        .chain((1..height).step_by(2));

    let mut out = vec![0; indicies.len()];
    for (row, y) in indicies.chunks_exact(width).zip(order) {
        out[y * width..(y + 1) * width].copy_from_slice(row);
    }
    out
}
