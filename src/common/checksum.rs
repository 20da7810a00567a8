// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ChecksumType {
    None = 0,
    #[default]
    Crc32 = 1,
}

impl TryFrom<u8> for ChecksumType {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        match value {
            0 => Ok(ChecksumType::None),
            1 => Ok(ChecksumType::Crc32),
            other => Err(TracedNimbleError::corrupt(format!(
                "invalid checksum type {other}"
            ))),
        }
    }
}

pub fn build_checksum(checksum_type: ChecksumType, data: &[u8]) -> u64 {
    match checksum_type {
        ChecksumType::None => 0,
        ChecksumType::Crc32 => crc32fast::hash(data) as u64,
    }
}

pub fn verify_checksum(
    checksum_type: ChecksumType,
    data: &[u8],
    expected: u64,
) -> NimbleResult<()> {
    let found = build_checksum(checksum_type, data);
    if found != expected {
        return Err(TracedNimbleError::corrupt(format!(
            "checksum mismatch: found {found}, expected {expected}"
        )));
    }
    Ok(())
}

/// Incremental variant used by the writer, which must seal the
/// postscript without re-reading everything it has emitted.
#[derive(Default)]
pub struct ChecksumBuilder {
    hasher: crc32fast::Hasher,
    checksum_type: ChecksumType,
}

impl ChecksumBuilder {
    pub fn new(checksum_type: ChecksumType) -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
            checksum_type,
        }
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    pub fn update(&mut self, data: &[u8]) {
        if self.checksum_type == ChecksumType::Crc32 {
            self.hasher.update(data);
        }
    }

    pub fn finish(self) -> u64 {
        match self.checksum_type {
            ChecksumType::None => 0,
            ChecksumType::Crc32 => self.hasher.finalize() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut builder = ChecksumBuilder::new(ChecksumType::Crc32);
        builder.update(&data[..10]);
        builder.update(&data[10..]);
        assert_eq!(builder.finish(), build_checksum(ChecksumType::Crc32, data));
    }

    #[test]
    fn test_verify_mismatch() {
        assert!(verify_checksum(ChecksumType::Crc32, b"abc", 0).is_err());
        assert!(verify_checksum(ChecksumType::None, b"abc", 0).is_ok());
    }
}
