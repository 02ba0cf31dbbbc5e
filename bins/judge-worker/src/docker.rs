//! The Container Driver: wraps a command-line container runtime. Given a
//! recipe's command tokens and a working directory, launches exactly one
//! container, feeds it stdin, captures stdout/stderr in full (up to a
//! per-stream cap), enforces a wall-clock deadline, and guarantees the
//! container is destroyed on every exit path.
//!
//! This shells out to the `docker` binary via `tokio::process::Command`
//! rather than talking to the daemon through an SDK, so it works against
//! any OCI-compatible command-line runtime without a matching client
//! library.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// The outcome of one `execute()` call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `-1` if the container was terminated by timeout or signal.
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
    /// The runtime itself could not be invoked, the image could not be
    /// pulled, or the bind mount was refused — the container's command
    /// never ran at all.
    pub spawn_failed: bool,
}

/// A bounded subprocess driver over a container runtime binary. Stateless
/// per call: every `execute()` generates its own container name and
/// working-directory contract, so concurrent calls from multiple workers
/// never collide.
#[derive(Debug, Clone)]
pub struct ContainerDriver {
    runtime_bin: String,
    output_cap_bytes: usize,
}

/// Fixed in-container mount point for the per-job working directory.
const CONTAINER_WORKDIR: &str = "/work";

/// Appended to a captured stream when it is truncated at `output_cap_bytes`.
/// Always appended to stderr regardless of which stream overflowed, so the
/// truncation is visible even when stdout itself is what got cut.
const TRUNCATION_SENTINEL: &str = "\n[output truncated: exceeded per-stream cap]\n";

/// Docker's CLI reserves exit code 125 for failures in the `docker run`
/// invocation itself — image pull, bind mount, daemon rejection — as
/// opposed to the exit code of the command that would have run inside the
/// container. A container whose command never started cannot itself have
/// produced this exit code, so it is a reliable signal on its own.
const RUNTIME_INVOCATION_FAILURE_EXIT_CODE: i32 = 125;

/// Stderr preambles the Docker CLI prints before the container's command
/// ever starts, covering image-pull and bind-mount failures. When the
/// command never starts, the container's stderr pipe carries only this
/// preamble, so matching on it is safe even though it's a substring check.
const SPAWN_FAILURE_STDERR_MARKERS: &[&str] = &[
    "unable to find image",
    "pull access denied",
    "repository does not exist",
    "no such image",
    "invalid mount config",
    "invalid bind mount",
    "mounts denied",
];

/// Whether `docker run` itself failed to start the container's command,
/// as opposed to the command running and exiting non-zero on its own.
fn looks_like_runtime_invocation_failure(exit_code: i32, stderr: &[u8]) -> bool {
    if exit_code == RUNTIME_INVOCATION_FAILURE_EXIT_CODE {
        return true;
    }
    let stderr_lower = String::from_utf8_lossy(stderr).to_lowercase();
    SPAWN_FAILURE_STDERR_MARKERS
        .iter()
        .any(|marker| stderr_lower.contains(marker))
}

impl ContainerDriver {
    pub fn new(runtime_bin: impl Into<String>, output_cap_bytes: usize) -> Self {
        Self {
            runtime_bin: runtime_bin.into(),
            output_cap_bytes,
        }
    }

    /// Run `command_tokens` inside a fresh container of `image`, with
    /// `workdir_host_path` bind-mounted as the working directory, `stdin_bytes`
    /// fed to standard input, and `timeout_ms`/`memory_limit_mib`/`cpu_quota`
    /// enforced as resource bounds.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        image: &str,
        command_tokens: &[String],
        workdir_host_path: &std::path::Path,
        stdin_bytes: &[u8],
        timeout_ms: u64,
        memory_limit_mib: u64,
        cpu_quota: f64,
    ) -> ExecutionOutcome {
        let container_name = format!("judge-{}", Uuid::new_v4());
        let mut args: Vec<String> = vec![
            "run".into(),
            "--name".into(),
            container_name.clone(),
            "--rm".into(),
            "--network".into(),
            "none".into(),
            "--user".into(),
            "1000:1000".into(),
            "--memory".into(),
            format!("{memory_limit_mib}m"),
            "--cpus".into(),
            format!("{cpu_quota}"),
            "-v".into(),
            format!("{}:{CONTAINER_WORKDIR}", workdir_host_path.display()),
            "-w".into(),
            CONTAINER_WORKDIR.into(),
            "-i".into(),
            image.to_string(),
        ];
        args.extend(command_tokens.iter().cloned());

        debug!(container = %container_name, image, ?command_tokens, "spawning container");

        let mut cmd = Command::new(&self.runtime_bin);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, runtime = %self.runtime_bin, "failed to spawn container runtime");
                return ExecutionOutcome {
                    spawn_failed: true,
                    ..Default::default()
                };
            }
        };

        let mut stdin_pipe = child.stdin.take();
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdin_bytes = stdin_bytes.to_vec();
        let cap = self.output_cap_bytes;

        let stdin_task = tokio::spawn(async move {
            if let Some(mut pipe) = stdin_pipe.take() {
                let _ = pipe.write_all(&stdin_bytes).await;
                let _ = pipe.shutdown().await;
            }
        });
        let stdout_task = tokio::spawn(async move { read_capped(&mut stdout_pipe, cap).await });
        let stderr_task = tokio::spawn(async move { read_capped(&mut stderr_pipe, cap).await });

        let start = Instant::now();
        let wait_result = timeout(Duration::from_millis(timeout_ms), child.wait()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let timed_out = wait_result.is_err();
        if timed_out {
            warn!(container = %container_name, timeout_ms, "execution deadline exceeded, killing container");
            self.kill(&container_name).await;
        }

        // The stdin/stdout/stderr tasks complete once the child's pipes
        // close, which `wait()` (or the kill above) guarantees happens.
        let _ = stdin_task.await;
        let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (mut stderr, stderr_truncated) = stderr_task.await.unwrap_or_default();
        if stdout_truncated || stderr_truncated {
            stderr.extend_from_slice(TRUNCATION_SENTINEL.as_bytes());
        }

        let exit_code = if timed_out {
            -1
        } else {
            match wait_result {
                Ok(Ok(status)) => status.code().unwrap_or(-1),
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to reap container process");
                    -1
                }
                Err(_) => unreachable!("timed_out handled above"),
            }
        };

        // `--rm` only removes the container once it has actually exited;
        // on the timeout path we just killed it, so an explicit, unconditional
        // forced removal keyed on the generated name guarantees cleanup on
        // every return path, whether the container ran to completion, was
        // killed, or never started at all.
        self.force_remove(&container_name).await;

        let spawn_failed = !timed_out && looks_like_runtime_invocation_failure(exit_code, &stderr);
        if spawn_failed {
            warn!(
                container = %container_name,
                exit_code,
                "docker run failed to start the container's command"
            );
        }

        ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            duration_ms,
            timed_out,
            spawn_failed,
        }
    }

    async fn kill(&self, container_name: &str) {
        let status = Command::new(&self.runtime_bin)
            .args(["kill", container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!(container = %container_name, error = %e, "failed to invoke kill");
        }
    }

    /// Best-effort forced removal, issued unconditionally on every return
    /// path. Removing an already-gone container is a harmless no-op for
    /// `docker rm -f`, so this is safe even when the runtime's own `--rm`
    /// already raced it away.
    async fn force_remove(&self, container_name: &str) {
        let status = Command::new(&self.runtime_bin)
            .args(["rm", "-f", container_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!(container = %container_name, error = %e, "failed to invoke forced removal");
        }
    }
}

/// Read a stream to completion, capped at `cap` bytes so neither stream
/// can exhaust memory or block the other. Returns the captured bytes and
/// whether the cap was hit.
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if buf.len() + n > cap {
            let remaining = cap.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..remaining]);
            // Drain the rest of the stream without buffering it, so the
            // producer never blocks on a full pipe we've stopped reading.
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            return (buf, true);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    (buf, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_capped_returns_everything_under_the_cap() {
        let data = b"hello world";
        let mut reader = std::io::Cursor::new(data.to_vec());
        let (out, truncated) = read_capped(&mut reader, 1024).await;
        assert_eq!(out, data);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn read_capped_truncates_at_the_byte_cap() {
        let data = vec![b'x'; 100];
        let mut reader = std::io::Cursor::new(data);
        let (out, truncated) = read_capped(&mut reader, 10).await;
        assert_eq!(out.len(), 10);
        assert!(truncated);
    }

    #[test]
    fn exit_code_125_is_treated_as_runtime_invocation_failure() {
        assert!(looks_like_runtime_invocation_failure(125, b""));
    }

    #[test]
    fn image_pull_stderr_is_treated_as_runtime_invocation_failure() {
        let stderr = b"Unable to find image 'judge-missing:latest' locally\n";
        assert!(looks_like_runtime_invocation_failure(1, stderr));
    }

    #[test]
    fn ordinary_nonzero_exit_is_not_a_runtime_invocation_failure() {
        assert!(!looks_like_runtime_invocation_failure(1, b"Traceback (most recent call last):\n"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_without_leaving_a_container() {
        let driver = ContainerDriver::new("judge-nonexistent-runtime-binary", 4096);
        let outcome = driver
            .execute(
                "irrelevant:latest",
                &["true".to_string()],
                std::path::Path::new("/tmp"),
                b"",
                1000,
                256,
                0.5,
            )
            .await;
        assert!(outcome.spawn_failed);
        assert!(!outcome.timed_out);
    }
}
