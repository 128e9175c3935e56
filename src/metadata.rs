//! Recording header (`info.rhs`) parsing.
//!
//! Only the fixed prefix is read:
//!
//! | offset | type | field          |
//! |--------|------|----------------|
//! | 0      | u32  | magic number   |
//! | 4      | i16  | version major  |
//! | 6      | i16  | version minor  |
//! | 8      | f32  | sample rate Hz |

use crate::error::{AppResult, StreamError};
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Magic number at the start of an RHS header.
pub const RHS_MAGIC: u32 = 0xD691_27AC;

const PREFIX_BYTES: usize = 12;

/// Parsed header prefix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecordingInfo {
    /// Raw magic number
    pub magic: u32,
    /// Format version (major, minor)
    pub version: (i16, i16),
    /// Samples per second
    pub sample_rate: f64,
}

impl RecordingInfo {
    /// Whether the magic number identifies an RHS header.
    pub fn has_rhs_magic(&self) -> bool {
        self.magic == RHS_MAGIC
    }

    /// Parse the header prefix from bytes.
    pub fn parse(path: &Path, bytes: &[u8]) -> AppResult<Self> {
        if bytes.len() < PREFIX_BYTES {
            return Err(StreamError::Metadata {
                path: path.to_path_buf(),
                reason: format!(
                    "header holds {} bytes, need at least {}",
                    bytes.len(),
                    PREFIX_BYTES
                ),
            });
        }

        let mut rdr = Cursor::new(bytes);
        let magic = rdr.read_u32::<LittleEndian>()?;
        let major = rdr.read_i16::<LittleEndian>()?;
        let minor = rdr.read_i16::<LittleEndian>()?;
        let sample_rate = f64::from(rdr.read_f32::<LittleEndian>()?);

        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(StreamError::Metadata {
                path: path.to_path_buf(),
                reason: format!("invalid sample rate {sample_rate}"),
            });
        }

        let info = Self {
            magic,
            version: (major, minor),
            sample_rate,
        };
        if !info.has_rhs_magic() {
            debug!(path = %path.display(), magic = format_args!("{magic:#010x}"), "Unexpected header magic");
        }
        Ok(info)
    }

    /// Read the header prefix from an open handle.
    pub fn read_from(file: &File, path: &Path) -> AppResult<Self> {
        let mut buf = Vec::with_capacity(PREFIX_BYTES);
        let mut handle = file;
        handle.seek(SeekFrom::Start(0))?;
        handle.by_ref().take(PREFIX_BYTES as u64).read_to_end(&mut buf)?;
        Self::parse(path, &buf)
    }

    /// Open `path` and read its header prefix.
    pub fn read_path(path: &Path) -> AppResult<Self> {
        let file = File::open(path)?;
        Self::read_from(&file, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn header(rate: f32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(RHS_MAGIC).unwrap();
        buf.write_i16::<LittleEndian>(3).unwrap();
        buf.write_i16::<LittleEndian>(2).unwrap();
        buf.write_f32::<LittleEndian>(rate).unwrap();
        buf.extend_from_slice(&[0u8; 32]);
        buf
    }

    #[test]
    fn reads_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.rhs");
        std::fs::write(&path, header(30_000.0)).unwrap();

        let info = RecordingInfo::read_path(&path).unwrap();
        assert_eq!(info.sample_rate, 30_000.0);
        assert_eq!(info.version, (3, 2));
        assert!(info.has_rhs_magic());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let path = Path::new("info.rhs");
        let bytes = header(20_000.0);
        assert!(matches!(
            RecordingInfo::parse(path, &bytes[..10]),
            Err(StreamError::Metadata { .. })
        ));
    }

    #[test]
    fn rejects_nonpositive_rate() {
        let path = Path::new("info.rhs");
        assert!(RecordingInfo::parse(path, &header(0.0)).is_err());
        assert!(RecordingInfo::parse(path, &header(f32::NAN)).is_err());
    }
}
