//! Executor supervision
//!
//! Spawns one child process per validated run request, fans its three
//! output streams (stdout, stderr, and a named-pipe side channel) into the
//! bulk upload pipeline, and reports the terminal status once the child
//! has been reaped and every stream has drained.
//!
//! The side channel lets an executor keep structured findings apart from
//! human-readable stdout: the dispatcher exports the pipe path as
//! `$FIFO_NAME` and treats lines arriving there exactly like stdout lines.

pub mod framer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::net::unix::pipe;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExecutorSpec;
use crate::router::AgentContext;
use crate::status::{emit, StatusFrame};
use framer::{FramerError, LineFramer};

/// Unlinks the named pipe when the run is over, abnormal exits included.
struct FifoGuard {
    path: PathBuf,
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Create a uniquely named FIFO inside `dir`, replacing any stale file at
/// the chosen path.
fn create_fifo(dir: &Path) -> std::io::Result<PathBuf> {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(10).collect();
    let path = dir.join(suffix);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
    Ok(path)
}

/// Compose the child command: the operator-authored `cmd` line run through
/// the system shell, with the configured varenvs, the pipe path, and the
/// coerced arguments lifted into the environment.
fn build_command(spec: &ExecutorSpec, fifo_path: &Path, args: &BTreeMap<String, String>) -> Command {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&spec.cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.varenvs {
        command.env(key, value);
    }
    command.env("FIFO_NAME", fifo_path);
    for (key, value) in args {
        command.env(format!("EXECUTOR_CONFIG_{}", key.to_uppercase()), value);
    }
    command
}

/// Supervise one executor invocation end to end.
pub async fn run(ctx: Arc<AgentContext>, spec: ExecutorSpec, args: BTreeMap<String, String>) {
    let fifo_path = match create_fifo(&std::env::temp_dir()) {
        Ok(path) => path,
        Err(e) => {
            error!("Could not create the side-channel pipe: {e}");
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
            return;
        }
    };
    let fifo_guard = FifoGuard {
        path: fifo_path.clone(),
    };

    // Read end opened before the child exists; the dispatcher-held write
    // end keeps the pipe alive until the child has been reaped, so EOF
    // arrives exactly when the sender is dropped below.
    let receiver = match pipe::OpenOptions::new().open_receiver(&fifo_path) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("Could not open the side-channel pipe: {e}");
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
            return;
        }
    };
    let sender = match pipe::OpenOptions::new().open_sender(&fifo_path) {
        Ok(sender) => sender,
        Err(e) => {
            error!("Could not open the side-channel pipe: {e}");
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
            return;
        }
    };

    emit(&ctx.frames, &StatusFrame::running(&spec.name, &ctx.agent_name)).await;
    info!("Running {} executor", spec.name);

    let mut child = match build_command(&spec, &fifo_path, &args).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Could not start executor {}: {e}", spec.name);
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
            return;
        }
    };

    let fifo_task = tokio::spawn(pump_records(
        LineFramer::new(receiver, spec.max_size),
        "fifo",
        Arc::clone(&ctx),
    ));

    let status = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => {
            let (_, _, status) = tokio::join!(
                pump_records(
                    LineFramer::new(stdout, spec.max_size),
                    "stdout",
                    Arc::clone(&ctx),
                ),
                pump_stderr(LineFramer::new(stderr, spec.max_size)),
                child.wait(),
            );
            status
        }
        _ => child.wait().await,
    };

    drop(sender);
    let _ = fifo_task.await;
    drop(fifo_guard);

    match status {
        Ok(status) if status.success() => {
            info!("Executor {} finished successfully", spec.name);
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, true)).await;
        }
        Ok(status) => {
            warn!(
                "Executor {} finished with exit code {}",
                spec.name,
                status.code().unwrap_or(-1)
            );
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
        }
        Err(e) => {
            error!("Could not reap executor {}: {e}", spec.name);
            emit(&ctx.frames, &StatusFrame::finished(&spec.name, &ctx.agent_name, false)).await;
        }
    }
}

/// Forward parsed JSON records from a structured stream to bulk create,
/// in arrival order.
async fn pump_records<R>(mut framer: LineFramer<R>, stream: &'static str, ctx: Arc<AgentContext>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match framer.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    warn!("{stream} sent empty data");
                    break;
                }
                debug!("Output line: {line}");
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(record) => ctx.api.bulk_create(&ctx.workspace, &record).await,
                    Err(e) => error!("JSON Parsing error: {e}"),
                }
            }
            Ok(None) => {
                warn!("{stream} sent empty data");
                break;
            }
            Err(FramerError::LineTooLong(_)) => {
                error!("ValueError raised processing stdout, try with bigger limiting size in config");
            }
            Err(FramerError::Io(e)) => {
                error!("Error reading {stream}: {e}");
                break;
            }
        }
    }
}

/// Log diagnostic stderr output.
async fn pump_stderr<R>(mut framer: LineFramer<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match framer.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    warn!("stderr sent empty data");
                    break;
                }
                debug!("Error line: {line}");
            }
            Ok(None) => {
                warn!("stderr sent empty data");
                break;
            }
            Err(FramerError::LineTooLong(_)) => {
                error!("ValueError raised processing stdout, try with bigger limiting size in config");
            }
            Err(FramerError::Io(e)) => {
                error!("Error reading stderr: {e}");
                break;
            }
        }
    }
}
