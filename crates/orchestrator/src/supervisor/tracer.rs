use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Substitute `{name}` placeholders in every argument.
pub(crate) fn expand(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Spawn `argv` with stdout and stderr appended to `log`. The log file is
/// created before the spawn even if the spawn fails.
pub(crate) fn spawn_logged(argv: &[String], log: &Path) -> io::Result<Child> {
    let out = OpenOptions::new().create(true).append(true).open(log)?;
    let err = out.try_clone()?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty tracer command"))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(out)
        .stderr(err)
        .spawn()
}

/// Poll until `log` has content. Returns false once `timeout` elapses.
pub(crate) fn wait_nonempty(log: &Path, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if std::fs::metadata(log).is_ok_and(|meta| meta.len() > 0) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn expands_placeholders() {
        let template = vec!["dtruss".to_owned(), "-p".to_owned(), "{pid}".to_owned()];
        assert_eq!(expand(&template, &[("pid", "42")]), ["dtruss", "-p", "42"]);

        let template = vec!["-u".to_owned(), "{apis}".to_owned(), "{pid}".to_owned()];
        assert_eq!(
            expand(&template, &[("apis", "libc,Foundation"), ("pid", "7")]),
            ["-u", "libc,Foundation", "7"]
        );
    }

    #[test]
    fn spawned_output_lands_in_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("trace.log");
        let argv = vec!["sh".to_owned(), "-c".to_owned(), "echo attached".to_owned()];
        let mut child = spawn_logged(&argv, &log).unwrap();
        child.wait().unwrap();
        assert!(wait_nonempty(&log, Duration::from_secs(5), Duration::from_millis(10)));
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "attached\n");
    }

    #[test]
    fn failed_spawn_still_creates_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("trace.log");
        let argv = vec!["/nonexistent/tracer".to_owned()];
        assert!(spawn_logged(&argv, &log).is_err());
        assert!(log.exists());
        assert!(!wait_nonempty(&log, Duration::from_millis(30), Duration::from_millis(10)));
    }
}
