//! Child-process invocation with a wall-clock limit and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of one backend process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded past the capture limit (stdout + stderr).
    pub truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Spawn `cmd`, feed `stdin`, and wait at most `timeout`.
///
/// Stdin is written and both pipes are drained on their own threads. At most
/// `output_limit_bytes` per stream are kept. A child that outlives `timeout`
/// is killed together with its process group (on Unix) and reported with
/// `timed_out = true`. Descendants that leave the group are not reached.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!("spawning backend process");
    let mut child = cmd.spawn().context("spawn backend command")?;

    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let input = stdin.to_vec();
    let stdin_handle = thread::spawn(move || child_stdin.write_all(&input));

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for backend")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "backend timed out, killing");
            timed_out = true;
            kill_tree(&mut child)?;
            child.wait().context("wait backend after kill")?
        }
    };

    if let Ok(Err(err)) = stdin_handle.join() {
        // The child may exit without reading all of its input.
        debug!(err = %err, "backend closed stdin early");
    }
    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;
    let truncated = stdout_truncated + stderr_truncated;
    if truncated > 0 {
        warn!(truncated, "backend output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "backend finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
    })
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child and everything it spawned into its process group.
fn kill_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => debug!(?status, "process group kill failed, killing child only"),
            Err(err) => debug!(err = %err, "kill utility unavailable, killing child only"),
        }
    }
    child.kill().context("kill backend")
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_from_stdin() {
        let output =
            run_with_timeout(sh("cat"), b"hello", Duration::from_secs(5), 1024).expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "hello");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_past_the_limit() {
        let output = run_with_timeout(
            sh("printf 0123456789"),
            b"",
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout_text(), "0123");
        assert_eq!(output.truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let output =
            run_with_timeout(sh("exec sleep 5"), b"", Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn timeout_reaches_forked_descendants() {
        let started = Instant::now();
        let output = run_with_timeout(
            sh("sleep 5; echo late"),
            b"",
            Duration::from_millis(100),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
