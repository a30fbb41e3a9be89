use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Runs the platform code-signature inspector against a file.
#[derive(Debug, Clone)]
pub struct SignatureInspector {
    argv: Vec<String>,
}

impl Default for SignatureInspector {
    fn default() -> Self {
        Self {
            argv: vec!["codesign".into(), "-dvvvv".into()],
        }
    }
}

impl SignatureInspector {
    /// `argv` is run with the inspected path appended as last argument.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Inspector output on success, its error text otherwise. Never fails:
    /// a missing tool is reported in the returned text.
    pub fn inspect(&self, path: &Path) -> String {
        let Some((program, args)) = self.argv.split_first() else {
            return "no signature inspector configured".to_owned();
        };
        let output = match Command::new(program).args(args).arg(path).output() {
            Ok(output) => output,
            Err(err) => {
                debug!(%program, %err, "signature inspector unavailable");
                return format!("{program}: {err}");
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // codesign reports its details on stderr even when it succeeds.
        if output.status.success() && !stdout.trim().is_empty() {
            stdout.into_owned()
        } else {
            stderr.into_owned()
        }
    }
}
