#![allow(clippy::cognitive_complexity)]
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use exclusive_lock::{ExclusiveLock, LeaseStore, LockEvent, RedisStore};
use tokio::{
    process::Command,
    runtime::Builder,
    signal,
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

mod config;

use config::{
    cli::{self, Parser},
    trace,
};

/// The lock is held by someone else.
const EXIT_HELD: u8 = 1;
/// The lock was lost while held.
const EXIT_LOST: u8 = 2;
/// Setup or store failure.
const EXIT_ERROR: u8 = 3;
/// Interrupted by ctrl-c before the command finished.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> Result<ExitCode> {
    // loaded first so it can feed the env fallbacks below
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.log, &config.log_format)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    let code = rt.block_on(async move {
        match tokio::spawn(start(config)).await {
            Err(err) => {
                error!(?err, "lock task failed");
                EXIT_ERROR
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                EXIT_ERROR
            }
            Ok(Ok(code)) => {
                debug!(code, "exiting...");
                code
            }
        }
    });

    Ok(ExitCode::from(code))
}

/// How a claim attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Acquired,
    HeldElsewhere,
    Interrupted,
}

async fn start(config: cli::Config) -> Result<u8> {
    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("failed to connect to redis")?;
    let lock = ExclusiveLock::new(&config.lock_options(), store)?;
    info!(key = lock.key(), "using lock key");

    let token = CancellationToken::new();
    let lost = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown_signal(token.clone()));
    let event_task = spawn_event_logger(lock.subscribe(), lost.clone());

    let code = match claim(&lock, &config, &token).await? {
        Claim::HeldElsewhere => {
            warn!(key = lock.key(), "lock is held elsewhere");
            EXIT_HELD
        }
        Claim::Interrupted => {
            info!("interrupted while waiting for lock");
            EXIT_INTERRUPTED
        }
        Claim::Acquired if config.command.is_empty() => {
            info!(key = lock.key(), "holding lock until interrupted");
            tokio::select! {
                _ = token.cancelled() => 0,
                _ = lost.cancelled() => {
                    error!(key = lock.key(), "lock lost");
                    EXIT_LOST
                }
            }
        }
        Claim::Acquired => run_command(&config.command, &token, &lost).await?,
    };

    // a lost lock is already idle, this is then a no-op
    if let Err(err) = lock.release().await {
        error!(?err, "failed to release lock, it will expire on its own");
    }
    signal_task.abort();
    drop(lock);
    if let Err(err) = event_task.await {
        error!(?err, "error waiting for event logger");
    }
    Ok(code)
}

/// Claim the lock, retrying every `retry_interval` with `--wait`. Store errors
/// are retried as well while waiting since an unclaimed key expires on its own.
async fn claim<S: LeaseStore>(
    lock: &ExclusiveLock<S>,
    config: &cli::Config,
    token: &CancellationToken,
) -> Result<Claim> {
    let mut ticker = time::interval(config.retry_interval());
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(Claim::Interrupted),
            _ = ticker.tick() => {}
        }
        match lock.acquire().await {
            Ok(true) => return Ok(Claim::Acquired),
            Ok(false) if !config.wait => return Ok(Claim::HeldElsewhere),
            Ok(false) => debug!(key = lock.key(), "lock is held elsewhere, retrying"),
            Err(err) if config.wait => warn!(?err, "failed to claim lock, retrying"),
            Err(err) => return Err(err).context("failed to claim lock"),
        }
    }
}

/// Run `command` until it exits. It is killed if the lock is lost or the
/// process is interrupted.
async fn run_command(
    command: &[String],
    token: &CancellationToken,
    lost: &CancellationToken,
) -> Result<u8> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;
    let mut child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    info!(pid = child.id(), program, "command started");

    tokio::select! {
        status = child.wait() => {
            let status = status.context("failed waiting on command")?;
            info!(%status, program, "command exited");
            // killed by a signal has no code
            Ok(status
                .code()
                .and_then(|code| u8::try_from(code).ok())
                .unwrap_or(EXIT_ERROR))
        }
        _ = lost.cancelled() => {
            error!(program, "lock lost, killing command");
            child.kill().await.context("failed to kill command")?;
            Ok(EXIT_LOST)
        }
        _ = token.cancelled() => {
            info!(program, "interrupted, killing command");
            child.kill().await.context("failed to kill command")?;
            Ok(EXIT_INTERRUPTED)
        }
    }
}

fn spawn_event_logger(
    mut events: broadcast::Receiver<LockEvent>,
    lost: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LockEvent::Renewed { key, ttl }) => {
                    debug!(key, ttl_ms = ttl.as_millis() as u64, "lock renewed");
                }
                Ok(LockEvent::RenewalFailed { key, error }) => {
                    error!(key, ?error, "lock renewal failed");
                    lost.cancel();
                }
                Ok(event) => info!(key = event.key(), event = event.name(), "lock event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lock event logger lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    })
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
