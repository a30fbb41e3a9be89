use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::{Path, PathBuf};

/// analyzer-rs: dynamic analysis of untrusted samples
///
/// analyzer-rs launches a sample inside the guest, traces every process it
/// spawns, collects the files and logs it leaves behind and ships them to the
/// result server. It can also statically inspect Mach-O containers.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run one dynamic analysis.
    Run {
        /// Path to configuration file. May be given several times, later
        /// files override earlier ones.
        ///
        /// If not provided, the default locations are checked. They are
        /// `/etc/analyzer-rs/config.toml`, `/etc/analyzer-rs/config.d/*.toml`,
        /// where the latter being a glob pattern, and `./analysis.toml`.
        #[arg(short, long, value_parser = validate_file)]
        config: Vec<PathBuf>,

        /// Copy artifacts and the completion report into this directory
        /// instead of sending them to the result server.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Parse a Mach-O container, or the application bundle inside a zip.
    Inspect {
        #[arg(value_parser = validate_file)]
        file: PathBuf,

        /// Indent the JSON output.
        #[arg(long)]
        pretty: bool,
    },

    /// Filter the system call logs of a results folder and print its
    /// behavior summary.
    Summarize {
        #[arg(value_parser = validate_dir)]
        results: PathBuf,

        /// Indent the JSON output.
        #[arg(long)]
        pretty: bool,
    },
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

#[inline(always)]
fn validate_dir(dir: &str) -> Result<PathBuf, String> {
    let path = Path::new(dir);
    if path.is_dir() {
        Ok(path.to_owned())
    } else {
        Err(format!("Directory not found: {:?}", path))
    }
}
