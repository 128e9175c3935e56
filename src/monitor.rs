//! Filesystem discovery for the monitored directory.
//!
//! A recursive `notify` watcher forwards newly created `.dat`/`.rhs` files to
//! the assembler as [`AssemblerCommand::NewFile`]. The watcher callback only
//! sends; all registry work happens on the assembler thread.
//!
//! When monitoring starts, recording files that already exist are announced
//! too: the subdirectory holding the most recently modified recording file is
//! scanned with `walkdir` and its files are sent in path order.

use crate::assembler::AssemblerCommand;
use crate::error::{AppResult, StreamError};
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions the recorder writes.
const RECORDING_EXTENSIONS: [&str; 2] = ["dat", "rhs"];

/// Whether `path` names a file the recorder could have written.
pub fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext))
}

/// Check that `root` exists and can be listed.
pub fn ensure_directory(root: &Path) -> AppResult<()> {
    let unavailable = |source| StreamError::DirectoryUnavailable {
        path: root.to_path_buf(),
        source,
    };
    let meta = fs::metadata(root).map_err(unavailable)?;
    if !meta.is_dir() {
        return Err(unavailable(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not a directory",
        )));
    }
    fs::read_dir(root).map_err(unavailable)?;
    Ok(())
}

/// Recording files of the newest session below `root`, in path order.
///
/// The newest session is the directory containing the most recently modified
/// recording file.
pub fn scan_existing(root: &Path) -> Vec<PathBuf> {
    let files: Vec<(PathBuf, SystemTime)> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_recording_file(entry.path()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (entry.into_path(), modified)
        })
        .collect();

    let Some(newest_dir) = files
        .iter()
        .max_by_key(|(_, modified)| *modified)
        .and_then(|(path, _)| path.parent())
        .map(Path::to_path_buf)
    else {
        return Vec::new();
    };

    let mut session: Vec<PathBuf> = files
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| path.parent() == Some(newest_dir.as_path()))
        .collect();
    session.sort();
    session
}

fn forward_event(event: &Event, tx: &UnboundedSender<AssemblerCommand>) {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
        // rename pairs carry [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().map(std::slice::from_ref).unwrap_or(&[])
        }
        _ => return,
    };

    for path in paths {
        if !is_recording_file(path) || path.is_dir() {
            continue;
        }
        if tx.send(AssemblerCommand::NewFile(path.clone())).is_err() {
            debug!("Assembler gone, dropping discovery event");
            return;
        }
    }
}

/// Live watch on one directory tree. Dropping it stops the watch.
pub struct DirectoryMonitor {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for DirectoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryMonitor")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DirectoryMonitor {
    /// Watch `root` recursively and announce files already present.
    pub fn start(root: &Path, tx: UnboundedSender<AssemblerCommand>) -> AppResult<Self> {
        ensure_directory(root)?;

        let callback_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward_event(&event, &callback_tx),
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(directory = %root.display(), "Monitoring directory");

        let existing = scan_existing(root);
        if !existing.is_empty() {
            info!(files = existing.len(), "Announcing existing recording files");
        }
        for path in existing {
            if tx.send(AssemblerCommand::NewFile(path)).is_err() {
                break;
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// The watched directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        debug!(directory = %self.root.display(), "Stopped monitoring directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn recognises_recording_extensions() {
        assert!(is_recording_file(Path::new("/r/amp-A-000.dat")));
        assert!(is_recording_file(Path::new("info.rhs")));
        assert!(!is_recording_file(Path::new("notes.txt")));
        assert!(!is_recording_file(Path::new("datfile")));
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ensure_directory(&missing),
            Err(StreamError::DirectoryUnavailable { .. })
        ));

        let file = dir.path().join("plain.dat");
        fs::write(&file, b"").unwrap();
        assert!(ensure_directory(&file).is_err());
        assert!(ensure_directory(dir.path()).is_ok());
    }

    #[test]
    fn scan_picks_newest_session_in_path_order() {
        let root = tempfile::tempdir().unwrap();
        let old = root.path().join("old");
        let new = root.path().join("new");
        fs::create_dir(&old).unwrap();
        fs::create_dir(&new).unwrap();

        fs::write(old.join("time.dat"), b"").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(new.join("time.dat"), b"").unwrap();
        fs::write(new.join("amp-A-000.dat"), b"").unwrap();
        fs::write(new.join("info.rhs"), b"").unwrap();
        fs::write(new.join("notes.txt"), b"").unwrap();

        let files = scan_existing(root.path());
        assert_eq!(
            files,
            vec![
                new.join("amp-A-000.dat"),
                new.join("info.rhs"),
                new.join("time.dat"),
            ]
        );
    }

    #[test]
    fn start_announces_existing_files() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("time.dat"), b"").unwrap();
        let (tx, mut rx) = unbounded_channel();

        let monitor = DirectoryMonitor::start(root.path(), tx).unwrap();
        assert_eq!(monitor.root(), root.path());
        assert_eq!(
            rx.try_recv().unwrap(),
            AssemblerCommand::NewFile(root.path().join("time.dat"))
        );
    }

    #[test]
    fn start_rejects_missing_directory() {
        let (tx, _rx) = unbounded_channel();
        assert!(matches!(
            DirectoryMonitor::start(Path::new("/definitely/not/here"), tx),
            Err(StreamError::DirectoryUnavailable { .. })
        ));
    }
}
