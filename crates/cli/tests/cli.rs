#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn analyzer(args: &[&str]) -> io::Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_analyzer-rs"))
        .args(args)
        .env("ANALYZER_LOG", "warn")
        .output()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json on stdout")
}

#[test]
fn inspecting_a_plain_file_prints_an_empty_object() -> io::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("notes.txt");
    fs::write(&path, "just some text")?;

    let output = analyzer(&["inspect", path.to_str().unwrap()])?;
    assert_eq!(stdout_json(&output), serde_json::json!({}));
    Ok(())
}

#[test]
fn inspecting_a_missing_file_fails() -> io::Result<()> {
    let output = analyzer(&["inspect", "/nonexistent/sample.bin"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("File not found"));
    Ok(())
}

fn write_logs(root: &Path) -> io::Result<()> {
    let logs = root.join("logs");
    fs::create_dir_all(&logs)?;
    fs::write(logs.join("processes.log"), "PID PPID COMM\n41 1 Installer\n")?;
    fs::write(logs.join("file_creation.log"), "/tmp/dropped\n")?;
    fs::write(
        logs.join("system_calls_41.log"),
        "open\nstat\nfstat\ngetpid\nwrite PROCESS:42\nlseek\nclose\n",
    )?;
    Ok(())
}

#[test]
fn summarize_filters_and_collects_logs() -> io::Result<()> {
    let dir = tempdir()?;
    write_logs(dir.path())?;

    let output = analyzer(&["summarize", dir.path().to_str().unwrap()])?;
    let summary = stdout_json(&output);
    assert_eq!(summary["processes"], serde_json::json!(["41 1 Installer"]));
    assert_eq!(summary["file_creation"], serde_json::json!(["/tmp/dropped"]));
    assert_eq!(summary["api_calls"], serde_json::json!({}));

    let filtered = fs::read_to_string(dir.path().join("logs/system_calls_41.log"))?;
    assert_eq!(filtered, "open\nstat\nclose\n");
    Ok(())
}

#[test]
fn unreadable_config_is_still_reported() -> io::Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[analysis\ntimeout = ")?;
    let export = dir.path().join("export");

    let output = Command::new(env!("CARGO_BIN_EXE_analyzer-rs"))
        .args(["run", "-c", config.to_str().unwrap(), "--export", export.to_str().unwrap()])
        .env("HOME", dir.path())
        .env("TMPDIR", dir.path())
        .env("ANALYZER_LOG", "warn")
        .output()?;
    assert!(!output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(export.join("completion.json"))?).expect("json report");
    assert_eq!(report["success"], serde_json::json!(false));
    assert!(report["error"].as_str().is_some_and(|error| !error.is_empty()));
    assert!(
        report["root"]
            .as_str()
            .is_some_and(|root| Path::new(root).starts_with(dir.path()))
    );
    Ok(())
}
