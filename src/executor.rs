//! Cancellable executor — runs a request's unit of work on a dedicated
//! worker thread and supervises it from the coordinating thread.
//!
//! Per request: exactly one worker is spawned, and the coordinating thread
//! blocks on a single `select!` over the worker's completion channel and the
//! request's interrupt channel. The completion channel is the only shared
//! state between the two threads; the worker's bookkeeping travels through it
//! once, which gives the happens-before edge the result readers rely on.
//!
//! Cancellation is cooperative and adapter-dependent. An interrupt never
//! kills the worker thread; it asks the adapter to abort open backend
//! connections so the worker's blocking call returns on its own. When the
//! adapter cannot cancel, the worker is left running detached and its
//! eventual result is discarded — the response has already gone out.

use crossbeam_channel::{bounded, never, Receiver, Sender};
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::error::{Result, RpcError};

/// Asynchronous interrupt delivered to a request's coordinating thread.
/// Carries the identity of the signal that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub signal: i32,
}

impl Interrupt {
    pub fn sigint() -> Self {
        Self {
            signal: signal_hook::consts::SIGINT,
        }
    }
}

/// Handle held by the transport layer to interrupt an in-flight request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<Interrupt>,
}

impl CancelHandle {
    /// Deliver an interrupt. Returns false if it could not be delivered
    /// (the request already finished, or an interrupt is already pending).
    pub fn cancel(&self, interrupt: Interrupt) -> bool {
        self.tx.try_send(interrupt).is_ok()
    }
}

/// Create the per-request interrupt channel.
pub fn interrupt_channel() -> (CancelHandle, Receiver<Interrupt>) {
    let (tx, rx) = bounded(1);
    (CancelHandle { tx }, rx)
}

/// Run `work` on a dedicated worker thread and block until it signals
/// completion or an interrupt arrives.
///
/// Completion path: the worker is joined before this returns, and whatever
/// `work` produced is handed back. A worker that died without reporting
/// (a panic) becomes an execution error on this thread.
///
/// Interrupt path: if the adapter is cancelable, every open backend
/// connection is told to cancel and the worker is joined before returning;
/// otherwise the worker is left running detached. Either way the request
/// fails with a killed error carrying the interrupt's signal, even if the
/// worker managed to finish in the background.
pub fn run_on_worker<T, F>(
    adapter: &dyn Adapter,
    interrupt: &Receiver<Interrupt>,
    work: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done_tx, done_rx) = bounded::<T>(1);
    let worker = std::thread::Builder::new()
        .name("quarry-worker".to_string())
        .spawn(move || {
            let outcome = work();
            if done_tx.send(outcome).is_err() {
                // Coordinator already returned a killed response; the late
                // result has no consumer.
                debug!("worker finished after cancellation; result discarded");
            }
        })
        .map_err(|e| RpcError::Internal(format!("failed to spawn worker thread: {}", e)))?;

    // A dropped CancelHandle disconnects the interrupt channel; that means
    // "nobody can cancel anymore", not "cancel now", so the wait falls back
    // to the completion channel alone.
    let mut interrupt_rx = interrupt.clone();
    loop {
        crossbeam_channel::select! {
            recv(done_rx) -> outcome => {
                let joined = worker.join();
                return match outcome {
                    Ok(value) => Ok(value),
                    // The sender dropped without sending: the worker panicked
                    // before it could report.
                    Err(_) => {
                        let detail = if joined.is_err() {
                            "worker thread panicked"
                        } else {
                            "worker thread exited without reporting a result"
                        };
                        Err(RpcError::Execution(anyhow::anyhow!(detail)))
                    }
                };
            }
            recv(interrupt_rx) -> msg => {
                let interrupt = match msg {
                    Ok(interrupt) => interrupt,
                    Err(_) => {
                        interrupt_rx = never();
                        continue;
                    }
                };
                if adapter.is_cancelable() {
                    for conn_name in adapter.cancel_open_connections() {
                        debug!("canceled query {}", conn_name);
                    }
                    let _ = worker.join();
                } else {
                    warn!(
                        "The {} adapter does not support query cancellation. \
                         Some queries may still be running!",
                        adapter.name()
                    );
                }
                return Err(RpcError::Killed { signal: interrupt.signal });
            }
        }
    }
}
