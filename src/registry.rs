//! File registry: one open read handle per discovered recording file.
//!
//! The registry is owned by the window assembler and only mutated from its
//! thread; discovery events reach it as commands, never directly from the
//! watcher callback.

use crate::channel::{ChannelClassifier, ChannelType};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// One monitored file.
#[derive(Debug)]
pub struct TrackedFile {
    path: PathBuf,
    basename: String,
    channel_type: ChannelType,
    file: File,
}

impl TrackedFile {
    /// Full path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Classified type.
    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// The open read handle.
    pub fn handle(&self) -> &File {
        &self.file
    }

    /// Current on-disk length of the file.
    pub fn len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// True when the file is currently empty.
    pub fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Result of handing a path to [`FileRegistry::process_new_file`].
#[derive(Debug)]
pub struct Registration<'a> {
    /// The tracked file for the path
    pub file: &'a TrackedFile,
    /// 1-based position of the file within its type bucket
    pub channel_index: usize,
    /// False when the path was already tracked
    pub newly_added: bool,
}

/// Tracks open files of the current session, bucketed by channel type.
#[derive(Debug, Default)]
pub struct FileRegistry {
    classifier: ChannelClassifier,
    current_directory: Option<PathBuf>,
    buckets: [Vec<TrackedFile>; 5],
    counts: [usize; 5],
    by_path: HashMap<PathBuf, (ChannelType, usize)>,
}

impl FileRegistry {
    /// Create an empty registry using `classifier` for new files.
    pub fn new(classifier: ChannelClassifier) -> Self {
        Self {
            classifier,
            ..Default::default()
        }
    }

    /// Register `path` if it is a recognised, openable recording file.
    ///
    /// Already-tracked paths return the existing entry. Unrecognised names and
    /// files that fail to open are logged and yield `None`.
    pub fn process_new_file(&mut self, path: &Path) -> Option<Registration<'_>> {
        if let Some(&(channel_type, idx)) = self.by_path.get(path) {
            return Some(Registration {
                file: &self.buckets[channel_type.index()][idx],
                channel_index: idx + 1,
                newly_added: false,
            });
        }

        let basename = path.file_name()?.to_string_lossy().into_owned();
        let Some(channel_type) = self.classifier.classify(&basename) else {
            debug!(file = %basename, "Ignoring unrecognised file");
            return None;
        };

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to open recording file");
                return None;
            }
        };

        let bucket = &mut self.buckets[channel_type.index()];
        bucket.push(TrackedFile {
            path: path.to_path_buf(),
            basename: basename.clone(),
            channel_type,
            file,
        });
        let idx = bucket.len() - 1;
        self.counts[channel_type.index()] += 1;
        self.by_path.insert(path.to_path_buf(), (channel_type, idx));

        info!(kind = %channel_type, file = %basename, "Added file");
        Some(Registration {
            file: &self.buckets[channel_type.index()][idx],
            channel_index: idx + 1,
            newly_added: true,
        })
    }

    /// Close every handle, clear all buckets and counts, and make `directory`
    /// the current one. Returns the number of handles closed.
    pub fn switch_directory(&mut self, directory: PathBuf) -> usize {
        info!(directory = %directory.display(), "Switching to directory");
        let closed = self.close_all();
        if closed > 0 {
            info!(closed, "Closed files during directory switch");
        }
        self.current_directory = Some(directory);
        closed
    }

    /// Close every tracked file. Returns the number closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self.by_path.len();
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.counts = [0; 5];
        self.by_path.clear();
        closed
    }

    /// Directory of the current session, if any.
    pub fn current_directory(&self) -> Option<&Path> {
        self.current_directory.as_deref()
    }

    /// Tracked files of one type, in discovery order.
    pub fn get_by_type(&self, channel_type: ChannelType) -> &[TrackedFile] {
        &self.buckets[channel_type.index()]
    }

    /// Number of tracked files of one type.
    pub fn count_by_type(&self, channel_type: ChannelType) -> usize {
        self.counts[channel_type.index()]
    }

    /// Whether `path` is tracked.
    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Total number of tracked files.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
