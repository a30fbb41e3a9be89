#![forbid(unsafe_code)]

//! Moves what the shim left in the capture folder into the results tree.

use crate::layout::RunLayout;
use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Shim logs in the capture folder. Everything else there is a copy of a
/// deleted file.
const FILE_LOG_PATTERN: &str = "file_*.log";
const CREATION_LOG: &str = "file_creation.log";

/// What [`collect_captures`] moved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collected {
    pub logs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// Rename, falling back to copy and delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(err) => Err(err),
    }
}

/// Path recorded on one `file_creation.log` line: whatever follows the
/// last colon, which drops the timestamp in front.
pub fn created_path(line: &str) -> Option<&str> {
    let path = line.rsplit(':').next()?.trim();
    (!path.is_empty()).then_some(path)
}

/// Relocate capture-folder files, then pick up created files the shim
/// recorded but did not copy. Per-file failures are logged and skipped.
pub fn collect_captures(layout: &RunLayout) -> Collected {
    let mut collected = Collected::default();
    relocate_capture_dir(layout, &mut collected);
    pick_up_created_files(layout, &mut collected);
    collected
}

fn relocate_capture_dir(layout: &RunLayout, collected: &mut Collected) {
    let entries = match std::fs::read_dir(&layout.capture_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(dir = %layout.capture_dir.display(), %err, "unable to read capture folder");
            return;
        }
    };
    let Ok(log_pattern) = Pattern::new(FILE_LOG_PATTERN) else {
        return;
    };

    for entry in entries.filter_map(Result::ok) {
        let source = entry.path();
        if !source.is_file() {
            continue;
        }
        let name = entry.file_name();
        let is_log = log_pattern.matches(&name.to_string_lossy());
        let destination = if is_log {
            layout.logs.join(&name)
        } else {
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or_default();
            info!(path = %source.display(), size, "adding deleted file");
            layout.files.join(&name)
        };
        match move_file(&source, &destination) {
            Ok(()) if is_log => collected.logs.push(destination),
            Ok(()) => collected.files.push(destination),
            Err(err) => error!(path = %source.display(), %err, "unable to relocate captured file"),
        }
    }
}

fn pick_up_created_files(layout: &RunLayout, collected: &mut Collected) {
    let log_path = layout.logs.join(CREATION_LOG);
    let text = match std::fs::read_to_string(&log_path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(path = %log_path.display(), %err, "unable to read file creation log");
            return;
        }
    };

    for path in text.lines().filter_map(created_path).map(Path::new) {
        let Some(name) = path.file_name() else {
            continue;
        };
        let destination = layout.files.join(name);
        if !path.is_file() || destination.exists() {
            continue;
        }
        let size = std::fs::metadata(path).map(|meta| meta.len()).unwrap_or_default();
        info!(path = %path.display(), size, "adding created file");
        match move_file(path, &destination) {
            Ok(()) => collected.files.push(destination),
            Err(err) => error!(path = %path.display(), %err, "failed to extract created file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn created_path_drops_timestamp() {
        assert_eq!(
            created_path("2014-03-01 10:11:12: /Users/x/evil.sh"),
            Some("/Users/x/evil.sh")
        );
        assert_eq!(created_path("/tmp/plain"), Some("/tmp/plain"));
        assert_eq!(created_path("10:11:  "), None);
    }

    #[test]
    fn sorts_capture_folder_into_logs_and_files() {
        let dir = tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.create_folders();
        std::fs::create_dir_all(&layout.capture_dir).unwrap();
        std::fs::write(layout.capture_dir.join("file_deletion.log"), b"x").unwrap();
        std::fs::write(layout.capture_dir.join("victim.doc"), b"y").unwrap();

        let collected = collect_captures(&layout);
        assert_eq!(collected.logs, [layout.logs.join("file_deletion.log")]);
        assert_eq!(collected.files, [layout.files.join("victim.doc")]);
        assert!(std::fs::read_dir(&layout.capture_dir).unwrap().next().is_none());
    }

    #[test]
    fn created_files_are_picked_up_once() {
        let dir = tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.create_folders();
        std::fs::create_dir_all(&layout.capture_dir).unwrap();

        let created = dir.path().join("dropped.bin");
        std::fs::write(&created, b"payload").unwrap();
        let shadowed = dir.path().join("victim.doc");
        std::fs::write(&shadowed, b"new").unwrap();
        std::fs::write(layout.capture_dir.join("victim.doc"), b"old").unwrap();
        std::fs::write(
            layout.capture_dir.join(CREATION_LOG),
            format!(
                "12:00:01: {}\n12:00:02: {}\n12:00:03: /nonexistent/file\n",
                created.display(),
                shadowed.display()
            ),
        )
        .unwrap();

        let collected = collect_captures(&layout);
        assert!(collected.files.contains(&layout.files.join("dropped.bin")));
        assert!(!created.exists());
        // The deleted copy already took the name.
        assert_eq!(std::fs::read(layout.files.join("victim.doc")).unwrap(), b"old");
        assert!(shadowed.exists());
    }

    #[test]
    fn missing_capture_folder_is_fine() {
        let dir = tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.create_folders();
        assert_eq!(collect_captures(&layout), Collected::default());
    }
}
