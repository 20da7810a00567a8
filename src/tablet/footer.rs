// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};

use crate::common::ChecksumType;
use crate::encodings::CompressionType;
use crate::tablet::{MAGIC, MAJOR_VERSION, MINOR_VERSION};
use crate::{NimbleError, NimbleResult, TracedNimbleError};

/// Fixed-size struct preceding the trailing magic. All fields are
/// little-endian:
/// `{footer_length:u32, footer_compression:u8, checksum:u64,
///   checksum_type:u8, major_version:u16, minor_version:u16}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Postscript {
    pub footer_length: u32,
    pub footer_compression: CompressionType,
    pub checksum: u64,
    pub checksum_type: ChecksumType,
    pub major_version: u16,
    pub minor_version: u16,
}

pub const POSTSCRIPT_SIZE: usize = 4 + 1 + 8 + 1 + 2 + 2;
pub const MAGIC_SIZE: usize = 2;

impl Postscript {
    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.footer_length);
        out.put_u8(self.footer_compression as u8);
        out.put_u64_le(self.checksum);
        out.put_u8(self.checksum_type as u8);
        out.put_u16_le(self.major_version);
        out.put_u16_le(self.minor_version);
    }

    /// Parse postscript + magic from the file tail. `tail` must hold
    /// the last `POSTSCRIPT_SIZE + MAGIC_SIZE` bytes.
    pub fn decode(tail: &[u8]) -> NimbleResult<Self> {
        if tail.len() < POSTSCRIPT_SIZE + MAGIC_SIZE {
            return Err(TracedNimbleError::corrupt(format!(
                "file tail too short: {} bytes",
                tail.len()
            )));
        }
        let mut magic = &tail[tail.len() - MAGIC_SIZE..];
        if magic.get_u16_le() != MAGIC {
            return Err(TracedNimbleError::corrupt("missing trailing magic"));
        }
        let mut buf = &tail[tail.len() - MAGIC_SIZE - POSTSCRIPT_SIZE..tail.len() - MAGIC_SIZE];
        let footer_length = buf.get_u32_le();
        let footer_compression = CompressionType::try_from(buf.get_u8())?;
        let checksum = buf.get_u64_le();
        let checksum_type = ChecksumType::try_from(buf.get_u8())?;
        let major_version = buf.get_u16_le();
        let minor_version = buf.get_u16_le();

        let postscript = Self {
            footer_length,
            footer_compression,
            checksum,
            checksum_type,
            major_version,
            minor_version,
        };
        postscript.check_version()?;
        Ok(postscript)
    }

    /// A reader handles files with an equal major version and a minor
    /// version no newer than its own.
    fn check_version(&self) -> NimbleResult<()> {
        if self.major_version != MAJOR_VERSION || self.minor_version > MINOR_VERSION {
            return Err(NimbleError::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
                supported_major: MAJOR_VERSION,
                supported_minor: MINOR_VERSION,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Postscript {
        Postscript {
            footer_length: 2333,
            footer_compression: CompressionType::Zstd,
            checksum: 0xDEAD_BEEF_CAFE,
            checksum_type: ChecksumType::Crc32,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
        }
    }

    #[test]
    fn test_round_trip() {
        let postscript = sample();
        let mut tail = vec![];
        postscript.encode(&mut tail);
        assert_eq!(tail.len(), POSTSCRIPT_SIZE);
        tail.put_u16_le(MAGIC);
        assert_eq!(&tail[tail.len() - 2..], &[0xFA, 0xA1]);
        assert_eq!(Postscript::decode(&tail).unwrap(), postscript);
    }

    #[test]
    fn test_bad_magic() {
        let mut tail = vec![];
        sample().encode(&mut tail);
        tail.put_u16_le(0x2333);
        assert!(Postscript::decode(&tail).is_err());
    }

    #[test]
    fn test_future_version_rejected() {
        let mut postscript = sample();
        postscript.major_version = MAJOR_VERSION + 1;
        let mut tail = vec![];
        postscript.encode(&mut tail);
        tail.put_u16_le(MAGIC);
        let err = Postscript::decode(&tail).unwrap_err();
        assert!(matches!(err.kind(), NimbleError::UnsupportedVersion { .. }));
    }
}
