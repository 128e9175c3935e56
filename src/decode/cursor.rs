#![allow(unsafe_code)]
//! Monotonic byte cursor over a file that is still being written.
//!
//! Two interchangeable strategies produce byte-identical results:
//!
//! - **Seek**: seek to the cursor and `read_exact`.
//! - **Mapped**: keep a read-only mapping `[start, start + len)` and copy out of
//!   it; when a read runs past the mapped range the window is dropped and a new
//!   one is mapped from the [`MAP_ALIGNMENT`] boundary at or below the cursor.
//!
//! Reads never extend past the file length observed at call time, and a mapping
//! never covers bytes beyond that length, so neither strategy can observe
//! zero-filled or stale pages. Recording files are append-only.
//!
//! A new mapping spans at least `map_window_bytes` but is clipped to the file
//! length at map time. The minimum therefore only saves remaps while the file
//! already holds data past the cursor (a backlog after attaching mid-recording,
//! or a finished file). A cursor that keeps up with a growing file reaches the
//! mapped end on most reads and remaps each time.

use crate::config::{DecodeStrategy, MAP_ALIGNMENT};
use crate::error::{AppResult, StreamError};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

struct MappedWindow {
    map: Mmap,
    start: u64,
}

impl MappedWindow {
    fn end(&self) -> u64 {
        self.start + self.map.len() as u64
    }
}

enum ByteAccess {
    Seek,
    Mapped {
        window: Option<MappedWindow>,
        min_len: u64,
    },
}

/// Byte position within one file plus the access strategy used to read it.
pub struct RecordCursor {
    position: u64,
    access: ByteAccess,
}

impl std::fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (strategy, mapped) = match &self.access {
            ByteAccess::Seek => ("seek", None),
            ByteAccess::Mapped { window, .. } => {
                ("mmap", window.as_ref().map(|w| (w.start, w.end())))
            }
        };
        f.debug_struct("RecordCursor")
            .field("position", &self.position)
            .field("strategy", &strategy)
            .field("mapped", &mapped)
            .finish()
    }
}

impl RecordCursor {
    /// Cursor at offset 0.
    ///
    /// `map_window_bytes` is the minimum mapping size for the mapped strategy,
    /// clipped to the file length; it is ignored for seek.
    pub fn new(strategy: DecodeStrategy, map_window_bytes: u64) -> Self {
        let access = match strategy {
            DecodeStrategy::Seek => ByteAccess::Seek,
            DecodeStrategy::Mmap => ByteAccess::Mapped {
                window: None,
                min_len: map_window_bytes.max(MAP_ALIGNMENT),
            },
        };
        Self {
            position: 0,
            access,
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read `len` bytes at the cursor without moving it.
    pub fn peek(&mut self, file: &File, path: &Path, len: usize) -> AppResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let available = file.metadata()?.len();
        let end = self.position + len as u64;
        if end > available {
            return Err(StreamError::ShortRead {
                path: path.to_path_buf(),
                offset: self.position,
                requested: len,
                available,
            });
        }

        match &mut self.access {
            ByteAccess::Seek => {
                let mut handle = file;
                handle.seek(SeekFrom::Start(self.position))?;
                let mut buf = vec![0u8; len];
                handle.read_exact(&mut buf).map_err(|e| {
                    if e.kind() == ErrorKind::UnexpectedEof {
                        StreamError::ShortRead {
                            path: path.to_path_buf(),
                            offset: self.position,
                            requested: len,
                            available,
                        }
                    } else {
                        StreamError::Io(e)
                    }
                })?;
                Ok(buf)
            }
            ByteAccess::Mapped { window, min_len } => {
                let covered = window
                    .as_ref()
                    .is_some_and(|w| self.position >= w.start && end <= w.end());
                if !covered {
                    // unmap before remapping
                    *window = None;
                    let start = self.position / MAP_ALIGNMENT * MAP_ALIGNMENT;
                    let map_len = (end - start).max(*min_len).min(available - start);
                    // SAFETY: the mapping is read-only and covers only bytes below
                    // the length just observed; recording files are append-only, so
                    // the mapped range is never truncated while we hold it.
                    let map = unsafe {
                        MmapOptions::new()
                            .offset(start)
                            .len(map_len as usize)
                            .map(file)?
                    };
                    trace!(
                        path = %path.display(),
                        start,
                        len = map_len,
                        "Remapped read window"
                    );
                    *window = Some(MappedWindow { map, start });
                }

                match window.as_ref() {
                    Some(w) => {
                        let local = (self.position - w.start) as usize;
                        Ok(w.map[local..local + len].to_vec())
                    }
                    None => Err(StreamError::Io(std::io::Error::new(
                        ErrorKind::Other,
                        "read window unavailable",
                    ))),
                }
            }
        }
    }

    /// Move the cursor forward by `len` bytes.
    pub fn advance(&mut self, len: u64) {
        self.position += len;
    }

    /// Read `len` bytes and advance past them.
    pub fn read(&mut self, file: &File, path: &Path, len: usize) -> AppResult<Vec<u8>> {
        let bytes = self.peek(file, path, len)?;
        self.advance(len as u64);
        Ok(bytes)
    }

    /// Place the cursor at an absolute offset. Only used when a file joins a
    /// session that has already consumed data.
    pub fn seek_to(&mut self, position: u64) {
        self.position = position;
    }

    /// Back to offset 0, releasing any mapping.
    pub fn reset(&mut self) {
        self.position = 0;
        if let ByteAccess::Mapped { window, .. } = &mut self.access {
            *window = None;
        }
    }

    /// Currently mapped byte range, if any.
    pub fn mapped_range(&self) -> Option<(u64, u64)> {
        match &self.access {
            ByteAccess::Mapped {
                window: Some(w), ..
            } => Some((w.start, w.end())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn seek_and_mapped_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp-A-000.dat");
        let data = pattern(300_000);
        std::fs::write(&path, &data).unwrap();
        let file = File::open(&path).unwrap();

        let mut seek = RecordCursor::new(DecodeStrategy::Seek, MAP_ALIGNMENT);
        let mut mapped = RecordCursor::new(DecodeStrategy::Mmap, MAP_ALIGNMENT);

        let mut out_seek = Vec::new();
        let mut out_mapped = Vec::new();
        for chunk in [10usize, 70_000, 1, 65_535, 100_000, 64_454] {
            out_seek.extend(seek.read(&file, &path, chunk).unwrap());
            out_mapped.extend(mapped.read(&file, &path, chunk).unwrap());
        }
        assert_eq!(out_seek, data);
        assert_eq!(out_mapped, data);
        assert_eq!(seek.position(), 300_000);
        assert_eq!(mapped.position(), 300_000);
    }

    #[test]
    fn mapped_window_is_aligned_and_bounded_by_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time.dat");
        std::fs::write(&path, pattern(200_000)).unwrap();
        let file = File::open(&path).unwrap();

        let mut cursor = RecordCursor::new(DecodeStrategy::Mmap, MAP_ALIGNMENT);
        cursor.read(&file, &path, 70_000).unwrap();
        cursor.read(&file, &path, 70_000).unwrap();
        let (start, end) = cursor.mapped_range().unwrap();
        assert_eq!(start % MAP_ALIGNMENT, 0);
        assert!(start <= 70_000);
        assert!(end <= 200_000);
    }

    #[test]
    fn reads_follow_a_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp-A-000.dat");
        let mut writer = File::create(&path).unwrap();
        let reader = File::open(&path).unwrap();
        let mut cursor = RecordCursor::new(DecodeStrategy::Mmap, MAP_ALIGNMENT);

        writer.write_all(&[1, 2, 3, 4]).unwrap();
        writer.flush().unwrap();
        assert_eq!(cursor.read(&reader, &path, 4).unwrap(), vec![1, 2, 3, 4]);

        // nothing new yet
        assert!(matches!(
            cursor.peek(&reader, &path, 2),
            Err(StreamError::ShortRead { .. })
        ));
        assert_eq!(cursor.position(), 4);

        writer.write_all(&[5, 6]).unwrap();
        writer.flush().unwrap();
        assert_eq!(cursor.read(&reader, &path, 2).unwrap(), vec![5, 6]);
    }

    #[test]
    fn peek_does_not_advance_and_reset_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stim-A-000.dat");
        std::fs::write(&path, pattern(64)).unwrap();
        let file = File::open(&path).unwrap();

        let mut cursor = RecordCursor::new(DecodeStrategy::Seek, MAP_ALIGNMENT);
        let first = cursor.peek(&file, &path, 8).unwrap();
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.read(&file, &path, 8).unwrap(), first);
        cursor.reset();
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.read(&file, &path, 8).unwrap(), first);
    }

    #[test]
    fn backlog_is_served_from_one_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp-A-000.dat");
        std::fs::write(&path, pattern(300_000)).unwrap();
        let file = File::open(&path).unwrap();

        let mut cursor = RecordCursor::new(DecodeStrategy::Mmap, 2 * MAP_ALIGNMENT);
        cursor.read(&file, &path, 10).unwrap();
        assert_eq!(cursor.mapped_range(), Some((0, 2 * MAP_ALIGNMENT)));
        cursor.read(&file, &path, 100_000).unwrap();
        assert_eq!(cursor.mapped_range(), Some((0, 2 * MAP_ALIGNMENT)));

        // past the mapped end: remapped from the aligned cursor
        cursor.read(&file, &path, 40_000).unwrap();
        assert_eq!(
            cursor.mapped_range(),
            Some((MAP_ALIGNMENT, 3 * MAP_ALIGNMENT))
        );
    }

    #[test]
    fn mapping_of_a_growing_file_stops_at_its_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp-A-000.dat");
        std::fs::write(&path, pattern(1000)).unwrap();
        let file = File::open(&path).unwrap();

        let mut cursor = RecordCursor::new(DecodeStrategy::Mmap, 64 * MAP_ALIGNMENT);
        cursor.read(&file, &path, 600).unwrap();
        assert_eq!(cursor.mapped_range(), Some((0, 1000)));
    }
}
