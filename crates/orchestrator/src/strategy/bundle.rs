use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub(crate) const OPEN: &str = "/usr/bin/open";

/// First file below `root` whose name contains `needle`.
pub(crate) fn find_file(root: &Path, needle: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name().to_string_lossy().contains(needle))
        .map(|entry| entry.into_path())
}

/// First directory below `root` whose name contains `needle`.
pub(crate) fn find_dir(root: &Path, needle: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .find(|entry| entry.file_name().to_string_lossy().contains(needle))
        .map(|entry| entry.into_path())
}

/// `CFBundleExecutable` from the bundle's `Info.plist`.
pub(crate) fn bundle_executable_name(bundle: &Path) -> Option<String> {
    let Some(plist_path) = WalkDir::new(bundle)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == "Info.plist")
        .map(|entry| entry.into_path())
    else {
        info!(bundle = %bundle.display(), "no Info.plist found in application bundle");
        return None;
    };

    let value = match plist::Value::from_file(&plist_path) {
        Ok(value) => value,
        Err(err) => {
            info!(path = %plist_path.display(), %err, "unreadable Info.plist");
            return None;
        }
    };
    let name = value
        .as_dictionary()
        .and_then(|dict| dict.get("CFBundleExecutable"))
        .and_then(plist::Value::as_string)
        .map(str::to_owned);
    if name.is_none() {
        info!(path = %plist_path.display(), "no main executable named in Info.plist");
    }
    name
}

/// Main executable of an application bundle, if the bundle is well formed.
pub(crate) fn app_executable(bundle: &Path) -> Option<PathBuf> {
    let name = bundle_executable_name(bundle)?;
    find_file(bundle, &name)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_bundle_executable() {
        let dir = tempdir().unwrap();
        let bundle = fixtures::app_bundle(dir.path(), "Preview", "Preview");
        assert_eq!(bundle_executable_name(&bundle).as_deref(), Some("Preview"));
        assert_eq!(
            app_executable(&bundle),
            Some(bundle.join("Contents/MacOS/Preview"))
        );
    }

    #[test]
    fn bundle_without_plist_has_no_executable() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("Broken.app");
        std::fs::create_dir_all(bundle.join("Contents/MacOS")).unwrap();
        assert_eq!(app_executable(&bundle), None);
    }

    #[test]
    fn finds_directories_by_substring() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Microsoft Office 2011/Microsoft Word.app")).unwrap();
        assert_eq!(
            find_dir(dir.path(), "Microsoft Office"),
            Some(dir.path().join("Microsoft Office 2011"))
        );
        assert_eq!(find_dir(dir.path(), "Pages"), None);
    }
}
