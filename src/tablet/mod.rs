// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! The tablet container: an ordered sequence of stripes, a stream
//! directory, schema and metadata in a protobuf footer, sealed by a
//! fixed-size postscript and trailing magic.

mod chunked_stream;
mod footer;
mod layout;
mod reader;
mod writer;

pub use chunked_stream::*;
pub use footer::*;
pub use layout::*;
pub use reader::*;
pub use writer::*;

/// Trailing magic, written little-endian: bytes `FA A1` end the file.
pub const MAGIC: u16 = 0xA1FA;

pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 1;
