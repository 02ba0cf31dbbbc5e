//! The Worker Pool: a configurable number of independent tasks that
//! repeatedly claim a pending job, assemble a working directory, invoke
//! the Container Driver once for compile (if applicable) and once for
//! run, and write the outcome back to the Job Store. Workers share no
//! per-job state — only the Job Store, the Language Registry, and the
//! Container Driver.

use std::path::PathBuf;
use std::sync::Arc;

use judge_common::job_store::JobStore;
use judge_common::language::{LanguageRecipe, LanguageRegistry};
use judge_common::types::{JobRecord, JobStatus, TerminalResult};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::docker::ContainerDriver;

/// Shared, read-only dependencies every worker task holds a clone of.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: JobStore,
    pub registry: Arc<LanguageRegistry>,
    pub driver: ContainerDriver,
    pub workdir_base: PathBuf,
}

/// Removes its job's private working directory on drop, so a panic
/// mid-job still cleans up the filesystem.
struct WorkdirGuard {
    path: PathBuf,
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove job working directory");
            }
        }
    }
}

/// One worker's main loop: claim, execute, commit, repeat. Runs until the
/// process is asked to shut down.
pub async fn worker_loop(worker_id: String, ctx: WorkerContext, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            job = ctx.store.claim_one(&worker_id) => Some(job),
        };

        let job = match claimed {
            None => break,
            Some(Ok(Some(job))) => job,
            Some(Ok(None)) => {
                // No pending work: back off briefly rather than hammering the store.
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                continue;
            }
            Some(Err(e)) => {
                error!(worker_id, error = %e, "job store unreachable, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        run_job(&worker_id, &ctx, job).await;
    }
    info!(worker_id, "worker shut down");
}

/// The per-job execution protocol: resolve the recipe, build a private
/// working directory, write the source, compile if required, run, and
/// commit the outcome — cleaning up the working directory regardless of
/// which path is taken.
async fn run_job(worker_id: &str, ctx: &WorkerContext, job: JobRecord) {
    let job_id = job.job_id;
    info!(worker_id, %job_id, language = %job.language_id, "claimed job");

    // Resolve the recipe.
    let recipe = match ctx.registry.get(job.language_id) {
        Some(recipe) => recipe.clone(),
        None => {
            // The registry is validated at submission time, so this can
            // only happen if the recipe set shrank after the job was
            // enqueued — treat it as an internal error, not a panic.
            commit(
                ctx,
                job_id,
                JobStatus::InternalError,
                TerminalResult {
                    error_message: Some(format!("no recipe for language {}", job.language_id)),
                    ..Default::default()
                },
            )
            .await;
            return;
        }
    };

    // A fresh, private, world-unique working directory.
    let workdir = ctx.workdir_base.join(format!("job-{job_id}"));
    if let Err(e) = std::fs::create_dir_all(&workdir) {
        commit(
            ctx,
            job_id,
            JobStatus::InternalError,
            TerminalResult {
                error_message: Some(format!("failed to create working directory: {e}")),
                ..Default::default()
            },
        )
        .await;
        return;
    }
    let _guard = WorkdirGuard {
        path: workdir.clone(),
    };

    // Write the source code byte-preserving.
    let source_path = workdir.join(&recipe.source_filename);
    if let Err(e) = std::fs::write(&source_path, &job.source_code) {
        commit(
            ctx,
            job_id,
            JobStatus::InternalError,
            TerminalResult {
                error_message: Some(format!("failed to write source file: {e}")),
                ..Default::default()
            },
        )
        .await;
        return;
    }

    let memory_limit_mib = job
        .overrides
        .memory_limit_mib
        .unwrap_or(recipe.default_memory_limit_mib);
    let cpu_quota = job.overrides.cpu_quota.unwrap_or(recipe.default_cpu_quota);

    // Compile, if the recipe requires it.
    if let Some(compile_command) = &recipe.compile_command {
        let compile_timeout_ms = job
            .overrides
            .timeout_ms
            .unwrap_or(recipe.default_compile_timeout_ms);

        let outcome = ctx
            .driver
            .execute(
                &recipe.image,
                compile_command,
                &workdir,
                b"",
                compile_timeout_ms,
                memory_limit_mib,
                cpu_quota,
            )
            .await;

        if outcome.spawn_failed {
            let diagnostic = String::from_utf8_lossy(&outcome.stderr);
            let error_message = if diagnostic.trim().is_empty() {
                format!("container runtime could not be invoked for compile step (exit code {})", outcome.exit_code)
            } else {
                format!("container runtime could not be invoked for compile step: {}", diagnostic.trim())
            };
            commit(
                ctx,
                job_id,
                JobStatus::InternalError,
                TerminalResult {
                    error_message: Some(error_message),
                    ..Default::default()
                },
            )
            .await;
            return;
        }

        if outcome.timed_out || outcome.exit_code != 0 {
            let mut merged = outcome.stdout;
            merged.extend_from_slice(&outcome.stderr);
            commit(
                ctx,
                job_id,
                JobStatus::CompileError,
                TerminalResult {
                    compile_output: Some(merged),
                    stdout: Some(Vec::new()),
                    stderr: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await;
            return;
        }
    }

    // Run.
    let run_timeout_ms = job.overrides.timeout_ms.unwrap_or(recipe.default_run_timeout_ms);
    let outcome = ctx
        .driver
        .execute(
            &recipe.image,
            &recipe.run_command,
            &workdir,
            &job.stdin,
            run_timeout_ms,
            memory_limit_mib,
            cpu_quota,
        )
        .await;

    let (status, result) = map_run_outcome(run_timeout_ms, outcome);
    commit(ctx, job_id, status, result).await;
}

/// Maps a completed run's raw [`crate::docker::ExecutionOutcome`] to the
/// terminal job status and result it produces, preserving captured
/// stdout/stderr byte-for-byte rather than coercing them to UTF-8.
fn map_run_outcome(
    run_timeout_ms: u64,
    outcome: crate::docker::ExecutionOutcome,
) -> (JobStatus, TerminalResult) {
    if outcome.spawn_failed {
        let diagnostic = String::from_utf8_lossy(&outcome.stderr);
        let error_message = if diagnostic.trim().is_empty() {
            format!("container runtime could not be invoked for run step (exit code {})", outcome.exit_code)
        } else {
            format!("container runtime could not be invoked for run step: {}", diagnostic.trim())
        };
        return (
            JobStatus::InternalError,
            TerminalResult {
                error_message: Some(error_message),
                ..Default::default()
            },
        );
    }

    if outcome.timed_out {
        return (
            JobStatus::Timeout,
            TerminalResult {
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr),
                exit_code: Some(-1),
                execution_time_ms: Some(run_timeout_ms),
                ..Default::default()
            },
        );
    }

    let exit_code = outcome.exit_code;
    let base = TerminalResult {
        stdout: Some(outcome.stdout),
        stderr: Some(outcome.stderr),
        exit_code: Some(exit_code),
        execution_time_ms: Some(outcome.duration_ms),
        ..Default::default()
    };

    if exit_code == 0 {
        (JobStatus::Completed, base)
    } else {
        (JobStatus::RuntimeError, base)
    }
}

async fn commit(ctx: &WorkerContext, job_id: Uuid, status: JobStatus, result: TerminalResult) {
    if let Err(e) = ctx.store.complete(job_id, status, result).await {
        error!(%job_id, error = %e, "failed to commit terminal transition");
    } else {
        info!(%job_id, ?status, "job reached terminal state");
    }
}

/// The stale-claim sweeper: on a timer, reclaims `running` jobs whose
/// worker has gone silent past `threshold` back to `pending`, so a
/// crashed worker never strands a job forever.
pub async fn sweeper_loop(
    store: JobStore,
    threshold: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                match store.reap_stale(threshold).await {
                    Ok(0) => {}
                    Ok(n) => warn!(reclaimed = n, "stale sweeper reclaimed abandoned running jobs"),
                    Err(e) => error!(error = %e, "stale sweeper query failed"),
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
