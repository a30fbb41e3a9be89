#![forbid(unsafe_code)]

//! Helpers run over a finished results tree.

use crate::channel::TRACED_PREFIXES;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Remove the system calls caused by the shim writing to the channel.
///
/// One channel write leaves four trace lines: two set-up calls, the write
/// carrying the record text, and the call after it.
pub fn filter_channel_writes(text: &str) -> Vec<&str> {
    let mut output = Vec::new();
    let mut lines = text.lines().enumerate();
    while let Some((index, line)) = lines.next() {
        if TRACED_PREFIXES.iter().any(|prefix| line.contains(prefix)) {
            if index > 2 {
                output.truncate(output.len().saturating_sub(2));
            }
            lines.next();
        } else {
            output.push(line);
        }
    }
    output
}

/// Rewrite one system call log in place. Returns the number of kept lines.
pub fn filter_syscall_log(path: &Path) -> io::Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let kept = filter_channel_writes(&text);
    let mut out = kept.join("\n");
    if !kept.is_empty() {
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(kept.len())
}

fn log_files(logs: &Path) -> impl Iterator<Item = (String, PathBuf)> {
    WalkDir::new(logs)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (name, entry.into_path())
        })
}

/// Filter every `system_calls_*` log below `logs`. Unreadable logs are
/// logged and left alone.
pub fn filter_syscall_logs(logs: &Path) -> BTreeMap<PathBuf, usize> {
    let mut filtered = BTreeMap::new();
    for (name, path) in log_files(logs).filter(|(name, _)| name.contains("system_calls")) {
        match filter_syscall_log(&path) {
            Ok(kept) => {
                debug!(log = name, kept, "system call log filtered");
                filtered.insert(path, kept);
            }
            Err(err) => warn!(path = %path.display(), %err, "unable to filter system call log"),
        }
    }
    filtered
}

/// Every behavior log of a run gathered into one structure.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BehaviorSummary {
    /// Keyed by log stem, e.g. `api_calls_512`.
    pub api_calls: BTreeMap<String, Vec<String>>,
    pub processes: Vec<String>,
    /// `file_activity`, `file_creation` and friends, at the top level.
    #[serde(flatten)]
    pub file_logs: BTreeMap<String, Vec<String>>,
}

fn read_lines(path: &Path, skip_header: bool) -> io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .skip(usize::from(skip_header))
        .map(str::to_owned)
        .collect())
}

impl BehaviorSummary {
    pub fn collect(logs: &Path) -> io::Result<Self> {
        let mut summary = Self::default();
        for (name, path) in log_files(logs) {
            let stem = Path::new(&name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            if name.contains("api_calls") {
                summary.api_calls.insert(stem, read_lines(&path, true)?);
            } else if name.contains("processes") {
                summary.processes = read_lines(&path, true)?;
            } else if name.contains("file_") {
                summary.file_logs.insert(stem, read_lines(&path, false)?);
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn drops_write_and_surrounding_calls() {
        let trace = "\
open
read
close
getpid
fstat
write FILE_CREATE:/tmp/x
lseek
mmap
";
        assert_eq!(filter_channel_writes(trace), ["open", "read", "close", "mmap"]);
    }

    #[test]
    fn early_match_keeps_preceding_lines() {
        let trace = "stat\nwrite PROCESS:77\nlseek\nopen\n";
        assert_eq!(filter_channel_writes(trace), ["stat", "open"]);
    }

    #[test]
    fn unrelated_lines_survive() {
        let trace = "open /etc/hosts\nwrite EXEC:/bin/ls\n";
        assert_eq!(
            filter_channel_writes(trace),
            ["open /etc/hosts", "write EXEC:/bin/ls"]
        );
    }

    #[test]
    fn filters_only_system_call_logs() {
        let dir = tempdir().unwrap();
        let syscalls = dir.path().join("system_calls_12.log");
        let api = dir.path().join("api_calls_12.log");
        std::fs::write(&syscalls, "a\nb\nc\nd\nwrite FILE_WRITE:/x\ne\nf\n").unwrap();
        std::fs::write(&api, "header\nwrite FILE_WRITE:/x\n").unwrap();

        let filtered = filter_syscall_logs(dir.path());
        assert_eq!(filtered.get(&syscalls), Some(&3));
        assert_eq!(std::fs::read_to_string(&syscalls).unwrap(), "a\nb\nf\n");
        assert_eq!(
            std::fs::read_to_string(&api).unwrap(),
            "header\nwrite FILE_WRITE:/x\n"
        );
    }

    #[test]
    fn summary_groups_logs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("api_calls_7.log"), "FUNC ARGS\nopen(/etc)\n").unwrap();
        std::fs::write(dir.path().join("processes.log"), "PID PPID\n7 1\n").unwrap();
        std::fs::write(dir.path().join("file_creation.log"), "12:00: /tmp/a\n").unwrap();
        std::fs::write(dir.path().join("analyzer.log"), "noise\n").unwrap();

        let summary = BehaviorSummary::collect(dir.path()).unwrap();
        assert_eq!(summary.api_calls["api_calls_7"], ["open(/etc)"]);
        assert_eq!(summary.processes, ["7 1"]);
        assert_eq!(summary.file_logs["file_creation"], ["12:00: /tmp/a"]);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("file_creation").is_some());
        assert!(json.get("analyzer").is_none());
    }
}
