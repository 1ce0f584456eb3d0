//! A memory-safe, pure-Rust JPEG 2000 codec core with an HTJ2K (ISO/IEC
//! 15444-15) block coder.
//!
//! The crate encodes and decodes raw JPEG 2000 codestreams. Images are
//! exchanged as planar [`Image`] buffers of `i32` samples; file-format
//! containers (JP2 boxes, BMP/PNG/TIFF) and I/O backends are out of scope
//! and live with the caller.
//!
//! ```no_run
//! use tessella::{decode, encode, EncoderParams, Image};
//!
//! let image = Image::new(256, 256, 3, 8, false);
//! let codestream = encode(&image, &EncoderParams::default()).unwrap();
//! let restored = decode(&codestream).unwrap();
//! assert_eq!(restored.components.len(), 3);
//! ```

#![forbid(unsafe_code)]

mod bit_reader;
mod bit_writer;
mod bitplane;
mod block;
mod codestream;
mod decode;
mod encode;
pub mod error;
mod fdwt;
mod ht;
mod idwt;
pub mod image;
mod log;
mod mct;
mod mq;
mod packet;
mod params;
mod progression;
mod quant;
mod rect;
mod tag_tree;
mod tile;

pub use error::{Error, ErrorKind, Position, Result};
pub use image::{
    ChannelDefinition, ChannelType, ColorSpace, Component, ComponentMapping, Image, ImageMetadata,
    Palette, ResolutionRatio,
};
pub use params::{
    CodeBlockStyle, DecoderParams, EncoderParams, Progression, ProgressionChange, Transformation,
};

/// Decode a raw JPEG 2000 codestream (starting at its SOC marker) into an
/// image.
pub fn decode(data: &[u8]) -> Result<Image> {
    decode::decode(data, &DecoderParams::default())
}

/// Decode with explicit decoder settings.
pub fn decode_with(data: &[u8], params: &DecoderParams) -> Result<Image> {
    decode::decode(data, params)
}

/// Encode an image into a raw JPEG 2000 codestream.
pub fn encode(image: &Image, params: &EncoderParams) -> Result<Vec<u8>> {
    encode::encode(image, params)
}
