use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Captured result of a child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Bytes read past the capture bound and discarded.
    pub dropped_bytes: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, u64)>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok((Vec::new(), 0));
    };
    let mut captured = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut captured).await?;
    // Keep draining so the child never blocks on a full pipe.
    let mut rest = limited.into_inner();
    let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
    Ok((captured, dropped))
}

/// Spawn `cmd`, optionally write `stdin`, and capture at most `limit` bytes
/// of each output stream. The child is killed if the returned future is
/// dropped, which is how callers enforce timeouts.
pub async fn run_captured(
    mut cmd: Command,
    stdin: Option<String>,
    limit: usize,
) -> Result<ProcessOutput, String> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn process: {}", e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| format!("Failed to write to stdin: {}", e))?;
        pipe.flush()
            .await
            .map_err(|e| format!("Failed to flush stdin: {}", e))?;
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) = tokio::join!(
        read_bounded(stdout, limit),
        read_bounded(stderr, limit),
        child.wait()
    );

    let (stdout, dropped_out) = stdout.map_err(|e| format!("Failed to read stdout: {}", e))?;
    let (stderr, dropped_err) = stderr.map_err(|e| format!("Failed to read stderr: {}", e))?;
    let status = status.map_err(|e| format!("Failed to wait for process: {}", e))?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code(),
        dropped_bytes: dropped_out + dropped_err,
    })
}
