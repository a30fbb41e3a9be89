use super::bundle::{OPEN, app_executable};
use super::packages::file_target;
use super::{Strategy, StrategyContext};
use crate::domain::TraceTarget;
use crate::error::Error;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipResult;

/// Password tried when the configured one (or none) does not work.
const FALLBACK_PASSWORD: &str = "infected";

/// Unpacks an archive into the scratch directory and runs one member.
#[derive(Debug)]
pub struct Zip {
    ctx: StrategyContext,
}

impl Zip {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }

    fn extract(
        archive: &mut ZipArchive<File>,
        root: &Path,
        password: Option<&[u8]>,
    ) -> ZipResult<()> {
        for index in 0..archive.len() {
            let mut entry = match password {
                Some(password) => archive.by_index_decrypt(index, password)?,
                None => archive.by_index(index)?,
            };
            let Some(relative) = entry.enclosed_name() else {
                warn!(name = entry.name(), "skipping archive entry outside the extraction root");
                continue;
            };
            let destination = root.join(relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&destination)?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&destination)?;
            std::io::copy(&mut entry, &mut out)?;
        }
        Ok(())
    }

    fn make_executable(path: &Path) {
        let entries = WalkDir::new(path).into_iter().filter_map(Result::ok);
        for entry in entries {
            let mode = std::fs::Permissions::from_mode(0o777);
            if let Err(err) = std::fs::set_permissions(entry.path(), mode) {
                warn!(path = %entry.path().display(), %err, "unable to make extracted file executable");
            }
        }
    }

    fn arguments(&self) -> impl Iterator<Item = String> + '_ {
        self.ctx
            .option("arguments")
            .into_iter()
            .flat_map(str::split_whitespace)
            .map(str::to_owned)
    }
}

impl Strategy for Zip {
    fn name(&self) -> &str {
        "zip"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let path = file_target(self.name(), target)?;
        let root = self.ctx.scratch_dir.clone();
        let invalid = |err: zip::result::ZipError| Error::strategy("zip", format!("invalid zip file: {err}"));

        let mut archive = ZipArchive::new(File::open(path)?).map_err(invalid)?;
        let first = if archive.is_empty() {
            None
        } else {
            Some(archive.by_index_raw(0).map_err(invalid)?.name().to_owned())
        };

        let password = self.ctx.option("password").map(str::as_bytes);
        if let Err(err) = Self::extract(&mut archive, &root, password) {
            debug!(%err, "extraction failed, retrying with the fallback password");
            Self::extract(&mut archive, &root, Some(FALLBACK_PASSWORD.as_bytes())).map_err(
                |err| Error::strategy("zip", format!("unable to extract zip file: {err}")),
            )?;
        }
        info!(archive = %path.display(), root = %root.display(), "archive extracted");

        let member = match self.ctx.option("file") {
            Some(file) => file.to_owned(),
            None => first.ok_or_else(|| Error::strategy("zip", "empty zip archive"))?,
        };
        let member_path = root.join(&member);
        Self::make_executable(&member_path);

        let (program, mut argv) = if member.ends_with(".app") || member.ends_with(".app/") {
            match app_executable(&member_path) {
                Some(executable) => {
                    let argv = vec![executable.to_string_lossy().into_owned()];
                    (executable, argv)
                }
                None => (
                    PathBuf::from(OPEN),
                    vec![OPEN.to_owned(), member_path.to_string_lossy().into_owned()],
                ),
            }
        } else {
            let argv = vec![member_path.to_string_lossy().into_owned()];
            (member_path, argv)
        };
        argv.extend(self.arguments());

        Ok(vec![self.ctx.launcher.execute(&program, &argv, true)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{RecordingLauncher, argv};
    use config::Options;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    fn strategy(launcher: &Arc<RecordingLauncher>, scratch: &Path, options: &str) -> Zip {
        Zip::new(StrategyContext {
            scratch_dir: scratch.to_owned(),
            ..StrategyContext::new(launcher.clone(), Options::parse(options))
        })
    }

    #[test]
    fn runs_first_member_by_default() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("sample.zip");
        write_zip(
            &archive,
            &[
                ("dropper", b"\xcf\xfa\xed\xfe".as_slice()),
                ("readme.txt", b"hi".as_slice()),
            ],
        );
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let launcher = Arc::new(RecordingLauncher::default());
        strategy(&launcher, &scratch, "arguments=--now")
            .start(&TraceTarget::File(archive))
            .unwrap();

        let dropper = scratch.join("dropper");
        let mode = std::fs::metadata(&dropper).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
        let dropper_arg = dropper.to_string_lossy().into_owned();
        assert_eq!(
            launcher.executed(),
            [(dropper.clone(), argv(&[&dropper_arg, "--now"]))]
        );
    }

    #[test]
    fn file_option_selects_member() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("sample.zip");
        write_zip(&archive, &[("a", b"1".as_slice()), ("bin/b", b"2".as_slice())]);
        let launcher = Arc::new(RecordingLauncher::default());
        strategy(&launcher, dir.path(), "file=bin/b")
            .start(&TraceTarget::File(archive))
            .unwrap();
        assert_eq!(launcher.executed()[0].0, dir.path().join("bin/b"));
    }

    #[test]
    fn app_bundle_runs_main_executable() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleExecutable".into(), plist::Value::String("Tool".into()));
        let mut info = Vec::new();
        plist::Value::Dictionary(dict).to_writer_xml(&mut info).unwrap();
        write_zip(
            &archive,
            &[
                ("Tool.app/", b"".as_slice()),
                ("Tool.app/Contents/Info.plist", info.as_slice()),
                ("Tool.app/Contents/MacOS/Tool", b"\xcf\xfa\xed\xfe".as_slice()),
            ],
        );
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let launcher = Arc::new(RecordingLauncher::default());
        strategy(&launcher, &scratch, "")
            .start(&TraceTarget::File(archive))
            .unwrap();
        assert_eq!(
            launcher.executed()[0].0,
            scratch.join("Tool.app/Contents/MacOS/Tool")
        );
    }

    #[test]
    fn empty_archive_is_a_strategy_error() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        write_zip(&archive, &[]);
        let launcher = Arc::new(RecordingLauncher::default());
        let err = strategy(&launcher, dir.path(), "")
            .start(&TraceTarget::File(archive))
            .unwrap_err();
        assert!(matches!(err, Error::Strategy { .. }));
    }

    #[test]
    fn garbage_is_a_strategy_error() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let err = strategy(&launcher, dir.path(), "")
            .start(&TraceTarget::File(archive))
            .unwrap_err();
        assert!(matches!(err, Error::Strategy { .. }));
    }
}
