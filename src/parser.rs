//! GIF reader. Feeds decoded frames to the encoder and checks its output in tests.

pub(crate) mod bit_reader;
mod compositor;
mod decoder;
pub mod lzw;

use thiserror::Error;

pub use compositor::Compositor;
pub use decoder::{
    Decoder, GraphicBlock, GraphicControlExtension, LogicalScreenDescriptor, TableBasedImage,
};

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("signature is invalid")]
    InvalidSignature,

    #[error("version {0} in the header is unsupported")]
    UnsupportedVersion(String),

    #[error("encountered extension with label 0x{0:02x}, this label is not supported")]
    InvalidExtensionLabel(u8),

    #[error("encountered unexpected label, this label is not supported: {0}")]
    UnexpectedLabel(u8),

    #[error("expected a block of {expected} bytes, got {actual}")]
    UnexpectedBlockSize { expected: u8, actual: u8 },

    #[error("graphic control extension is missing its block terminator")]
    MissingBlockTerminator,

    #[error("encountered application descriptor with name {name}, expected descriptor data length to be {expected}, actual length is {actual}")]
    UnexpectedApplicationDescriptorDataLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("minimum code size {0} is out of range")]
    InvalidMinimumCodeSize(u8),

    #[error("code {code} is not in the code table ({table_len} entries)")]
    InvalidCode { code: usize, table_len: usize },
}
