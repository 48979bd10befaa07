#![allow(dead_code)]

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};
use stcp_sip::config::StackConfig;

const CHILD_POLLING_INTERVAL: Duration = Duration::from_millis(20);

/// Transport timing scaled down so handshakes and retries finish quickly.
pub fn fast_config() -> StackConfig {
    StackConfig {
        syn_timeout: Duration::from_millis(50),
        fin_timeout: Duration::from_millis(50),
        data_timeout: Duration::from_millis(50),
        sendbuf_polling_interval: Duration::from_millis(5),
        accept_polling_interval: Duration::from_millis(20),
        recvbuf_polling_interval: Duration::from_millis(20),
        closewait_timeout: Duration::from_millis(200),
        loss_rate: 0.0,
        ..Default::default()
    }
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Writes `content` to a fresh file under the system temp directory.
pub fn write_temp_file(name: &str, content: &[u8]) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("stcp_sip_{}", std::process::id()));
    fs::create_dir_all(&dir).context("Failed to create the temp directory.")?;
    let path = dir.join(name);
    fs::write(&path, content).with_context(|| format!("Failed to write {}.", path.display()))?;
    Ok(path)
}

pub fn child_wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(Some(status));
            }
            Ok(None) => {}
            Err(e) => {
                anyhow::bail!("Error waiting for child. {:?}", e)
            }
        }
        thread::sleep(CHILD_POLLING_INTERVAL);
    }
    Ok(None)
}

pub fn check_stdout_pattern(child: &mut Child, patterns: &[&str]) -> Result<bool> {
    let stdout = child.stdout.take().context("Cannot take stdout from child.")?;
    let output: String = BufReader::new(stdout).lines().collect::<Result<Vec<_>, _>>()?.join("\n");
    println!("output: {}", output);
    Ok(patterns.iter().all(|pattern| output.contains(pattern)))
}

pub fn dump_stderr(child: &mut Child) -> Result<()> {
    println!("=== Dump stderr start id={} ===", child.id());
    let stderr = child.stderr.take().context("Cannot take stderr from child.")?;
    for line in BufReader::new(stderr).lines() {
        println!("{}", line.context("Failed to read line")?);
    }
    println!("=== Dump stderr end id={} ===", child.id());
    Ok(())
}
