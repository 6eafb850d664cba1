use crate::proxy::ProxyStatus;
use crate::session::Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tether_backend::Backend;
use tether_channel::{Cell, NO_REQUEST, OpRegion, WaitOutcome};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, trace};

/// What the doorbell observed on the op slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bell {
    /// A posted op code, already cleared from the slot.
    Request(i32),
    /// A whole wait window passed without a request.
    Idle,
}

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const EXITING: u8 = 2;

/// Shutdown handshake between the supervisor and a running serve loop.
///
/// `RUNNING -> STOPPING` on shutdown, back to `RUNNING` if a restart arrives before
/// the loop notices, or `STOPPING -> EXITING` once the loop commits to leaving.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn reset(&self) {
        self.state.store(RUNNING, Ordering::Release);
    }

    /// Returns false if the loop is already stopping or gone.
    pub(crate) fn request_shutdown(&self) -> bool {
        self.transition(RUNNING, STOPPING)
    }

    /// Withdraws a shutdown the loop has not acted on yet.
    pub(crate) fn cancel_shutdown(&self) -> bool {
        self.transition(STOPPING, RUNNING)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn begin_exit(&self) -> bool {
        self.transition(STOPPING, EXITING)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

/// Blocks on the op slot and forwards what it sees, one bell at a time.
///
/// The channel has capacity one and the caller never posts a second request before
/// the first is answered, so at most one request is ever in flight. Returns once the
/// serve loop hangs up; a request taken from the slot but not delivered is put back.
pub(crate) fn ring_doorbell(op: &OpRegion, window: Duration, bells: &mpsc::Sender<Bell>) {
    loop {
        let bell = match op.wait(Cell::Op, NO_REQUEST, window) {
            WaitOutcome::TimedOut => Bell::Idle,
            WaitOutcome::NotEqual | WaitOutcome::Woken => match op.swap(Cell::Op, NO_REQUEST) {
                NO_REQUEST => continue,
                code => Bell::Request(code),
            },
        };

        if let Err(mpsc::error::SendError(bell)) = bells.blocking_send(bell) {
            if let Bell::Request(code) = bell {
                op.store(Cell::Op, code);
                debug!(code, "Returned undelivered request to the op slot");
            }
            break;
        }
    }
    trace!("Doorbell stopped");
}

/// Services requests until shutdown is requested, then hands the session back.
#[instrument(name = "serve", skip_all)]
pub(crate) async fn serve<B: Backend>(
    mut session: Session<B>,
    lifecycle: Arc<Lifecycle>,
    status: Arc<watch::Sender<ProxyStatus>>,
) -> Session<B> {
    let op = Arc::clone(session.channel.op_region());
    let window = session.options.wait_window;
    let (tx, mut rx) = mpsc::channel(1);
    let doorbell = {
        let op = Arc::clone(&op);
        tokio::task::spawn_blocking(move || ring_doorbell(&op, window, &tx))
    };

    info!(window_ms = window.as_millis() as u64, "Serving requests");

    while let Some(bell) = rx.recv().await {
        match bell {
            Bell::Request(code) => session.service(code).await,
            Bell::Idle => session.idle().await,
        }
        if lifecycle.begin_exit() {
            break;
        }
    }

    rx.close();
    if let Err(err) = doorbell.await {
        error!(error = %err, "Doorbell task failed");
    }
    while let Ok(bell) = rx.try_recv() {
        if let Bell::Request(code) = bell {
            op.store(Cell::Op, code);
            debug!(code, "Returned queued request to the op slot");
        }
    }

    status.send_replace(ProxyStatus::Stopped);
    info!("Stopped serving");
    session
}
