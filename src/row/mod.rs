// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Row-wise writer and reader over the tablet container: batches go
//! in as [`Vector`] trees, stripes and streams come out, and reads
//! project, skip and seek without touching unselected columns.

mod field_readers;
mod field_writers;
mod flush;
mod growth;
mod layout_tree;
mod reader;
mod vector;
mod writer;

pub use flush::*;
pub use growth::*;
pub use layout_tree::*;
pub use reader::*;
pub use vector::*;
pub use writer::*;

#[cfg(test)]
mod tests;
