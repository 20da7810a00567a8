// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Nimble is a columnar file format for wide, deeply nested analytics
//! data. A file (a *tablet*) is an ordered sequence of stripes; every
//! column at every nesting level materializes as one stream of typed
//! values per stripe, and each stream is a sequence of independently
//! decodable, self-describing encoded chunks.

#![deny(unused_must_use)]

pub mod common;
pub mod encodings;
mod error;
pub mod row;
pub mod schema;
pub mod tablet;

pub use self::error::{NimbleError, NimbleResult, TracedNimbleError};
