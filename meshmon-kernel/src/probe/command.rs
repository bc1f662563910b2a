//! Local ping execution.

use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Argument list for the platform's ping binary
pub fn ping_args(address: &str, count: u32, timeout_secs: u64) -> Vec<String> {
    if cfg!(target_os = "windows") {
        vec![
            "-n".into(),
            count.to_string(),
            "-w".into(),
            (timeout_secs * 1000).to_string(),
            address.into(),
        ]
    } else {
        vec![
            "-c".into(),
            count.to_string(),
            "-W".into(),
            timeout_secs.to_string(),
            address.into(),
        ]
    }
}

/// Upper bound for the whole ping process: per-reply timeout plus one second per packet plus slack
pub fn process_deadline(count: u32, timeout_secs: u64) -> Duration {
    Duration::from_secs(timeout_secs + count as u64 + 3)
}

/// Runs ping and returns its stdout, whatever the exit status.
///
/// Ping exits non-zero on packet loss, which is still a report worth parsing.
pub async fn run_ping(address: &str, count: u32, timeout_secs: u64) -> io::Result<String> {
    let args = ping_args(address, count, timeout_secs);
    debug!("running ping {}", args.join(" "));

    let child = Command::new("ping")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(process_deadline(count, timeout_secs), child)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("ping {} timed out", address)))??;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
