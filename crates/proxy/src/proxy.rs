use crate::dispatcher::{Lifecycle, serve};
use crate::error::{ProxyError, ProxyErrorExt};
use crate::handshake::Handshake;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::session::Session;
use std::future::pending;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tether_backend::Backend;
use tether_channel::{Cell, NO_REQUEST, OpRegion, RESULT_PENDING};
use tether_runtime::build_proxy_runtime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Poll interval of [`Proxy::wait_for_status`].
const STATUS_POLL: Duration = Duration::from_millis(2);

/// Lifecycle reports of a proxy, mirroring a worker's status messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyStatus {
    /// The proxy thread is up and waiting for its handshake.
    Loaded,
    /// The handshake was accepted and requests are being served.
    Inited,
    /// The serve loop exited after a shutdown; a restart resumes it.
    Stopped,
    /// The handshake was rejected or the proxy thread could not run.
    Unavailable(String),
}

#[derive(Debug)]
enum Admin {
    Init { handshake: Box<Handshake>, reply: oneshot::Sender<Result<(), ProxyError>> },
    DumpMetrics { reply: oneshot::Sender<MetricsSnapshot> },
    ResetMetrics,
    Shutdown,
    Restart,
}

/// Owner of one proxy thread.
///
/// Every method is synchronous, matching the caller side of the protocol. Dropping the
/// proxy stops its serve loop, closes every held access handle and joins the thread.
#[derive(Debug)]
pub struct Proxy {
    admin: Option<mpsc::UnboundedSender<Admin>>,
    status: watch::Receiver<ProxyStatus>,
    metrics: Arc<Metrics>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Proxy {
    /// Starts a proxy thread serving `backend`; it waits for [`Proxy::init`].
    ///
    /// # Errors
    /// [`ProxyError::Io`] when the OS refuses to spawn the thread.
    pub fn spawn<B: Backend>(backend: B) -> Result<Self, ProxyError> {
        let (admin_tx, admin_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ProxyStatus::Loaded);
        let status_tx = Arc::new(status_tx);
        let metrics = Arc::new(Metrics::default());

        let thread_metrics = Arc::clone(&metrics);
        let thread = thread::Builder::new()
            .name("tether-proxy".to_owned())
            .spawn(move || match build_proxy_runtime() {
                Ok(runtime) => runtime.block_on(supervise(backend, admin_rx, status_tx, thread_metrics)),
                Err(err) => {
                    error!(error = %err, "Proxy runtime failed to start");
                    status_tx.send_replace(ProxyStatus::Unavailable(err.to_string()));
                },
            })
            .context("Failed to spawn proxy thread")?;

        debug!("Proxy thread loaded");
        Ok(Self { admin: Some(admin_tx), status: status_rx, metrics, thread: Some(thread) })
    }

    /// Hands over the handshake and starts serving.
    ///
    /// # Errors
    /// The validation error when the handshake is rejected (the status becomes
    /// [`ProxyStatus::Unavailable`]), [`ProxyError::InvalidRequest`] on a second init, or
    /// [`ProxyError::Unavailable`] when the proxy thread is gone.
    pub fn init(&self, handshake: Handshake) -> Result<(), ProxyError> {
        let (reply, response) = oneshot::channel();
        self.send(Admin::Init { handshake: Box::new(handshake), reply })?;
        response.blocking_recv().map_err(|_| ProxyError::unavailable("proxy thread exited during init"))?
    }

    #[must_use]
    pub fn status(&self) -> ProxyStatus {
        self.status.borrow().clone()
    }

    /// Blocks until the status satisfies `accept`.
    ///
    /// # Errors
    /// [`ProxyError::Timeout`] carrying the last status seen.
    pub fn wait_for_status(
        &self,
        timeout: Duration,
        accept: impl Fn(&ProxyStatus) -> bool,
    ) -> Result<ProxyStatus, ProxyError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if accept(&status) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ProxyError::Timeout {
                    message: format!("proxy status is still {status:?}").into(),
                    context: None,
                });
            }
            thread::sleep(STATUS_POLL);
        }
    }

    /// Logs every counter through the proxy thread and returns them.
    ///
    /// # Errors
    /// [`ProxyError::Unavailable`] when the proxy thread is gone.
    pub fn dump_metrics(&self) -> Result<MetricsSnapshot, ProxyError> {
        let (reply, response) = oneshot::channel();
        self.send(Admin::DumpMetrics { reply })?;
        response.blocking_recv().map_err(|_| ProxyError::unavailable("proxy thread exited"))
    }

    /// Current counters without logging them.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// # Errors
    /// [`ProxyError::Unavailable`] when the proxy thread is gone.
    pub fn reset_metrics(&self) -> Result<(), ProxyError> {
        self.send(Admin::ResetMetrics)
    }

    /// Asks the serve loop to exit after its current cycle.
    ///
    /// # Errors
    /// [`ProxyError::Unavailable`] when the proxy thread is gone.
    pub fn shutdown(&self) -> Result<(), ProxyError> {
        self.send(Admin::Shutdown)
    }

    /// Resumes serving after a shutdown, keeping open files and held handles.
    ///
    /// # Errors
    /// [`ProxyError::Unavailable`] when the proxy thread is gone.
    pub fn restart(&self) -> Result<(), ProxyError> {
        self.send(Admin::Restart)
    }

    fn send(&self, command: Admin) -> Result<(), ProxyError> {
        self.admin
            .as_ref()
            .ok_or_else(|| ProxyError::unavailable("proxy is shutting down"))?
            .send(command)
            .map_err(|_| ProxyError::unavailable("proxy thread is gone"))
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.admin.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Proxy thread panicked");
        }
    }
}

/// Where the serve loop of a proxy stands, as seen by its supervisor.
#[derive(Debug)]
enum Serving<B: Backend> {
    /// No handshake accepted yet, or the last serve loop failed.
    Idle,
    Running { task: JoinHandle<Session<B>>, inflight: Inflight },
    /// The loop exited after a shutdown and handed its session back.
    Stopped(Box<Session<B>>),
}

/// Answers a request whose serve loop died under it.
#[derive(Debug)]
struct Inflight {
    op: Arc<OpRegion>,
    io_err: i32,
}

impl Inflight {
    fn abandon(&self) {
        if self.op.load(Cell::Result) == RESULT_PENDING {
            self.op.swap(Cell::Op, NO_REQUEST);
            self.op.store(Cell::Result, self.io_err);
            self.op.notify(Cell::Result);
            warn!(rc = self.io_err, "Answered the interrupted request");
        }
    }
}

enum Event<B: Backend> {
    Admin(Option<Admin>),
    Exited(Result<Box<Session<B>>, JoinError>),
}

/// Owns the serve task and answers administrative commands until the proxy is dropped.
async fn supervise<B: Backend>(
    backend: B,
    mut admin: mpsc::UnboundedReceiver<Admin>,
    status: Arc<watch::Sender<ProxyStatus>>,
    metrics: Arc<Metrics>,
) {
    let lifecycle = Arc::new(Lifecycle::default());
    let mut serving = Serving::Idle;

    loop {
        let event = tokio::select! {
            command = admin.recv() => Event::Admin(command),
            exited = exited(&mut serving) => Event::Exited(exited),
        };
        let command = match event {
            Event::Admin(Some(command)) => command,
            Event::Admin(None) => break,
            Event::Exited(exited) => {
                if let Serving::Running { inflight, .. } = &serving {
                    serving = settle(inflight, exited, &status);
                }
                continue;
            },
        };

        match command {
            Admin::Init { handshake, reply } => {
                if !matches!(serving, Serving::Idle) {
                    let _ = reply.send(Err(ProxyError::invalid_request("proxy is already initialized")));
                    continue;
                }
                match handshake.validate() {
                    Ok((channel, options)) => {
                        let session = Session::new(backend.clone(), channel, options, Arc::clone(&metrics));
                        serving = launch(session, &lifecycle, &status);
                        let _ = reply.send(Ok(()));
                    },
                    Err(err) => {
                        error!(error = %err, "Handshake rejected");
                        status.send_replace(ProxyStatus::Unavailable(err.to_string()));
                        let _ = reply.send(Err(err));
                    },
                }
            },
            Admin::DumpMetrics { reply } => {
                let _ = reply.send(metrics.dump());
            },
            Admin::ResetMetrics => {
                metrics.reset();
                debug!("Metrics reset");
            },
            Admin::Shutdown => {
                if lifecycle.request_shutdown() {
                    info!("Shutdown requested");
                }
            },
            Admin::Restart => serving = restart(serving, &lifecycle, &status).await,
        }
    }

    lifecycle.request_shutdown();
    let session = match serving {
        Serving::Running { task, .. } => task.await.ok().map(Box::new),
        Serving::Stopped(session) => Some(session),
        Serving::Idle => None,
    };
    if let Some(mut session) = session {
        session.release_all().await;
    }
    debug!("Proxy supervisor exited");
}

/// Resolves once a running serve loop ends; never while there is none.
async fn exited<B: Backend>(serving: &mut Serving<B>) -> Result<Box<Session<B>>, JoinError> {
    match serving {
        Serving::Running { task, .. } => task.await.map(Box::new),
        Serving::Idle | Serving::Stopped(_) => pending().await,
    }
}

/// Records how a serve loop ended. A failed loop leaves the proxy unavailable and
/// answers the request it was servicing so the caller does not wait out its timeout.
fn settle<B: Backend>(
    inflight: &Inflight,
    exited: Result<Box<Session<B>>, JoinError>,
    status: &watch::Sender<ProxyStatus>,
) -> Serving<B> {
    match exited {
        Ok(session) => Serving::Stopped(session),
        Err(err) => {
            error!(error = %err, "Serve loop failed");
            inflight.abandon();
            status.send_replace(ProxyStatus::Unavailable(format!("serve loop failed: {err}")));
            Serving::Idle
        },
    }
}

fn launch<B: Backend>(
    session: Session<B>,
    lifecycle: &Arc<Lifecycle>,
    status: &Arc<watch::Sender<ProxyStatus>>,
) -> Serving<B> {
    let inflight = Inflight { op: Arc::clone(session.channel.op_region()), io_err: session.codes.io_err };
    lifecycle.reset();
    status.send_replace(ProxyStatus::Inited);
    let task = tokio::spawn(serve(session, Arc::clone(lifecycle), Arc::clone(status)));
    Serving::Running { task, inflight }
}

async fn restart<B: Backend>(
    serving: Serving<B>,
    lifecycle: &Arc<Lifecycle>,
    status: &Arc<watch::Sender<ProxyStatus>>,
) -> Serving<B> {
    let session = match serving {
        Serving::Idle => {
            warn!("Restart without a serve loop ignored");
            return Serving::Idle;
        },
        Serving::Stopped(session) => session,
        Serving::Running { task, inflight } => {
            if lifecycle.cancel_shutdown() {
                info!("Pending shutdown withdrawn");
                return Serving::Running { task, inflight };
            }
            if lifecycle.is_running() {
                debug!("Restart ignored, already serving");
                return Serving::Running { task, inflight };
            }
            // Exiting: wait for the loop to hand its session back.
            match settle(&inflight, task.await.map(Box::new), status) {
                Serving::Stopped(session) => session,
                other => return other,
            }
        },
    };
    info!("Restarting serve loop");
    launch(*session, lifecycle, status)
}
