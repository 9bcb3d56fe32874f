//! Worker threads.
//!
//! Each worker is an isolated execution context on its own OS thread: the
//! bootstrap closure builds whatever context it needs (typically a
//! `LoaderContext` with its own registry) after the thread starts, so no
//! loader state ever crosses the boundary. The only communication is the
//! message channel, which delivers structured-clone copies. A send with a
//! non-clonable value fails at send time, before anything is transmitted.
//!
//! A worker whose synchronous bootstrap has finished is kept alive exactly
//! while a receive handler is registered; clearing the handler is the
//! documented way to let the worker exit.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use stoat_core::{HostError, Payload, SerializationError, Value};
use thiserror::Error;
use tracing::{debug, error, info_span, warn};

/// Number of live workers, for host event-loop integration: the loop should
/// not exit while this is non-zero.
pub type ActiveWorkerCount = Arc<AtomicU32>;

/// Errors from worker operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The message contained a value outside the clone domain. Raised at
    /// send time; no partial message is delivered.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("worker already terminated")]
    Terminated,

    #[error("failed to send message: {0}")]
    SendFailed(String),

    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}

/// Options for creating a worker.
pub struct WorkerOptions {
    /// Thread name, also used for the worker's tracing span.
    pub name: Option<String>,
    /// Initial data handed to the worker, structured-cloned at spawn time.
    pub worker_data: Value,
    /// Counter to increment for the worker's lifetime.
    pub active_count: Option<ActiveWorkerCount>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: None,
            worker_data: Value::Undefined,
            active_count: None,
        }
    }
}

/// Parent → worker control messages.
enum ControlMessage {
    Data(Payload),
    Terminate,
}

/// Handle to a spawned worker, held by the parent thread.
pub struct Worker {
    name: String,
    tx: Sender<ControlMessage>,
    rx: Receiver<Payload>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn a worker thread. `bootstrap` runs first on the new thread; it
    /// builds the worker's own execution context and may register a message
    /// handler to keep the worker alive afterwards.
    ///
    /// `worker_data` is cloned here, on the spawning thread: a non-clonable
    /// value fails the spawn rather than arriving truncated.
    pub fn spawn<F>(options: WorkerOptions, bootstrap: F) -> Result<Worker, WorkerError>
    where
        F: FnOnce(&mut WorkerContext) -> Result<(), HostError> + Send + 'static,
    {
        let worker_data = Payload::encode(&options.worker_data)?;
        let name = options
            .name
            .unwrap_or_else(|| "stoat-worker".to_string());

        let (control_tx, control_rx) = unbounded::<ControlMessage>();
        let (out_tx, out_rx) = unbounded::<Payload>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let active = options.active_count.clone();
        if let Some(count) = &active {
            count.fetch_add(1, Ordering::SeqCst);
        }

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let shutdown = shutdown.clone();
                let running = running.clone();
                let name = name.clone();
                move || {
                    let _span = info_span!("worker", name = %name).entered();
                    debug!("worker starting");
                    run_worker(control_rx, out_tx, worker_data, &shutdown, bootstrap);
                    running.store(false, Ordering::SeqCst);
                    if let Some(count) = &active {
                        count.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!("worker stopped");
                }
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Worker {
            name,
            tx: control_tx,
            rx: out_rx,
            running,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send a copy of `value` to the worker.
    ///
    /// Serialization happens before the send: a value outside the clone
    /// domain fails here and nothing is delivered.
    pub fn post_message(&self, value: &Value) -> Result<(), WorkerError> {
        let payload = Payload::encode(value)?;
        if !self.is_running() {
            return Err(WorkerError::Terminated);
        }
        self.tx
            .send(ControlMessage::Data(payload))
            .map_err(|e| WorkerError::SendFailed(e.to_string()))
    }

    /// Non-blocking receive of the next worker → parent message.
    pub fn try_recv_message(&self) -> Result<Option<Value>, WorkerError> {
        match self.rx.try_recv() {
            Ok(payload) => Ok(Some(payload.decode()?)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    /// Blocking receive with a timeout.
    pub fn recv_message_timeout(&self, timeout: Duration) -> Result<Option<Value>, WorkerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload.decode()?)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// Abort the worker's receive loop and wait for the thread to stop. All
    /// in-flight loads on the worker die with its context; other workers are
    /// unaffected.
    pub fn terminate(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tx.send(ControlMessage::Terminate);
        self.join();
    }

    /// Wait for the worker to exit on its own (bootstrap finished and no
    /// receive handler registered, or the handler was cleared).
    pub fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Worker → parent sending end plus the handler-cleared flag, available to
/// the message handler while it runs.
pub struct ParentPort {
    tx: Sender<Payload>,
    cleared: Cell<bool>,
}

impl ParentPort {
    /// Send a copy of `value` to the parent. Same send-time serialization
    /// contract as [`Worker::post_message`].
    pub fn post_message(&self, value: &Value) -> Result<(), WorkerError> {
        let payload = Payload::encode(value)?;
        self.tx
            .send(payload)
            .map_err(|e| WorkerError::SendFailed(e.to_string()))
    }

    /// Drop the receive handler after the current dispatch, letting the
    /// worker exit.
    pub fn clear_message_handler(&self) {
        self.cleared.set(true);
    }
}

type MessageHandler = Box<dyn FnMut(Value, &ParentPort)>;

/// The worker side of the boundary, handed to the bootstrap closure.
pub struct WorkerContext {
    worker_data: Payload,
    port: ParentPort,
    handler: Option<MessageHandler>,
}

impl WorkerContext {
    /// The data passed at spawn, rebuilt on this thread.
    pub fn worker_data(&self) -> Result<Value, SerializationError> {
        self.worker_data.decode()
    }

    pub fn port(&self) -> &ParentPort {
        &self.port
    }

    pub fn post_message(&self, value: &Value) -> Result<(), WorkerError> {
        self.port.post_message(value)
    }

    /// Register the receive handler. While one is registered the worker is
    /// kept alive after bootstrap returns.
    pub fn set_message_handler(&mut self, handler: impl FnMut(Value, &ParentPort) + 'static) {
        self.port.cleared.set(false);
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_message_handler(&mut self) {
        self.handler = None;
    }

    pub fn has_message_handler(&self) -> bool {
        self.handler.is_some()
    }
}

fn run_worker<F>(
    rx: Receiver<ControlMessage>,
    out_tx: Sender<Payload>,
    worker_data: Payload,
    shutdown: &AtomicBool,
    bootstrap: F,
) where
    F: FnOnce(&mut WorkerContext) -> Result<(), HostError>,
{
    let mut ctx = WorkerContext {
        worker_data,
        port: ParentPort {
            tx: out_tx,
            cleared: Cell::new(false),
        },
        handler: None,
    };

    match catch_unwind(AssertUnwindSafe(|| bootstrap(&mut ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            // Worker-local failures stay local; the parent learns about them
            // only through messages the worker chose to send.
            error!(error = %e, "worker bootstrap failed");
            return;
        }
        Err(_) => {
            error!("worker bootstrap panicked");
            return;
        }
    }

    // Keep-alive: no handler, no reason to stay.
    let Some(mut handler) = ctx.handler.take() else {
        return;
    };

    loop {
        if shutdown.load(Ordering::SeqCst) || ctx.port.cleared.get() {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(10)) {
            Ok(ControlMessage::Data(payload)) => match payload.decode() {
                Ok(value) => handler(value, &ctx.port),
                Err(e) => warn!(error = %e, "dropping malformed message"),
            },
            Ok(ControlMessage::Terminate) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
