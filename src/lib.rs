pub mod encoder;
pub mod parser;

pub use encoder::{
    DisposalMethod, EncodeError, EncoderOptions, FileDestination, GifWriter, Rgb, SourceFrame,
};
pub use parser::{Compositor, Decoder};
