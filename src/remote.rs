//! Delegation of leaf work to remote services.
//!
//! A remote node never blocks the tick. It asks the [`RemoteClient`] to
//! start a request and then polls the returned [`CallHandle`] once per tick
//! until the service reports a terminal status. The client owns the
//! registered services, caches sessions per `(service, host)` and enforces
//! per-request timeouts.
//!
//! Services implement [`RemoteService`]. Anything that can run a request to
//! completion on a worker thread can be wrapped in a [`ThreadedService`].

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::{error::RemoteError, node::RemoteOp, value::Value};

/// Identifier a service assigns to a started request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

/// Client-side handle for an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandle(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub op: RemoteOp,
    pub service: String,
    pub host: String,
    /// Label of the node that issued the request.
    pub node: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    /// Still running, with the latest feedback if the service sends any.
    Pending(Option<Value>),
    Succeeded(Value),
    Failed(String),
}

/// A remote service. Every method must return promptly; long running work
/// belongs behind [`RemoteService::start`] and is observed through
/// [`RemoteService::poll`].
///
/// Errors are transport level messages. An operation that ran and failed is
/// reported as [`CallStatus::Failed`] instead.
pub trait RemoteService: Send {
    fn open_session(&mut self, host: &str) -> Result<(), String>;
    fn start(&mut self, request: &RemoteRequest) -> Result<CallId, String>;
    fn poll(&mut self, call: CallId) -> Result<CallStatus, String>;
    fn cancel(&mut self, call: CallId) -> Result<(), String>;
}

struct Outstanding {
    service: String,
    call: CallId,
    started_at: Duration,
    timeout: Option<Duration>,
}

#[derive(Default)]
pub struct RemoteClient {
    services: HashMap<String, Box<dyn RemoteService>>,
    sessions: HashSet<(String, String)>,
    calls: HashMap<CallHandle, Outstanding>,
    next_handle: u64,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("sessions", &self.sessions)
            .field("outstanding", &self.calls.len())
            .finish()
    }
}

impl RemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, service: impl RemoteService + 'static) {
        self.services.insert(name.into(), Box::new(service));
    }

    pub fn with_service(
        mut self,
        name: impl Into<String>,
        service: impl RemoteService + 'static,
    ) -> Self {
        self.register(name, service);
        self
    }

    fn service(&mut self, name: &str) -> Result<&mut Box<dyn RemoteService>, RemoteError> {
        self.services
            .get_mut(name)
            .ok_or_else(|| RemoteError::UnknownService(name.to_owned()))
    }

    /// Opens a session unless one is already cached for this service and host.
    pub fn ensure_session(&mut self, service: &str, host: &str) -> Result<(), RemoteError> {
        let key = (service.to_owned(), host.to_owned());
        if self.sessions.contains(&key) {
            return Ok(());
        }
        self.service(service)?
            .open_session(host)
            .map_err(|message| RemoteError::Session {
                service: service.to_owned(),
                message,
            })?;
        log::info!("Opened session with {service:?} on {host:?}");
        self.sessions.insert(key);
        Ok(())
    }

    /// Drops cached sessions so the next request opens a new one.
    pub fn reset_sessions(&mut self) {
        self.sessions.clear();
    }

    pub fn start(
        &mut self,
        request: &RemoteRequest,
        timeout: Option<Duration>,
        now: Duration,
    ) -> Result<CallHandle, RemoteError> {
        let call = self
            .service(&request.service)?
            .start(request)
            .map_err(|message| RemoteError::Call {
                service: request.service.clone(),
                message,
            })?;
        let handle = CallHandle(self.next_handle);
        self.next_handle += 1;
        log::debug!(
            "{}: started {:?} on {:?} as {:?}",
            request.node,
            request.op,
            request.service,
            call
        );
        self.calls.insert(
            handle,
            Outstanding {
                service: request.service.clone(),
                call,
                started_at: now,
                timeout,
            },
        );
        Ok(handle)
    }

    /// Polls an outstanding request. A terminal status retires the handle,
    /// as does a timeout, which also cancels the request on the service.
    /// Transport errors leave the handle in place so it can be polled again.
    pub fn poll(&mut self, handle: CallHandle, now: Duration) -> Result<CallStatus, RemoteError> {
        let Some(outstanding) = self.calls.get(&handle) else {
            return Err(RemoteError::Call {
                service: String::new(),
                message: format!("unknown call handle {handle:?}"),
            });
        };
        let service_name = outstanding.service.clone();
        let call = outstanding.call;
        let deadline = outstanding.timeout.map(|t| (t, outstanding.started_at + t));

        let status = self
            .service(&service_name)?
            .poll(call)
            .map_err(|message| RemoteError::Call {
                service: service_name.clone(),
                message,
            })?;

        match status {
            CallStatus::Pending(_) => {
                if let Some((after, deadline)) = deadline {
                    if now >= deadline {
                        self.cancel(handle);
                        return Err(RemoteError::Timeout {
                            service: service_name,
                            after,
                        });
                    }
                }
            }
            CallStatus::Succeeded(_) | CallStatus::Failed(_) => {
                self.calls.remove(&handle);
            }
        }
        Ok(status)
    }

    /// Best-effort cancellation. Failures are logged and otherwise ignored.
    pub fn cancel(&mut self, handle: CallHandle) {
        let Some(outstanding) = self.calls.remove(&handle) else {
            return;
        };
        let result = self
            .service(&outstanding.service)
            .and_then(|service| {
                service
                    .cancel(outstanding.call)
                    .map_err(|message| RemoteError::Call {
                        service: outstanding.service.clone(),
                        message,
                    })
            });
        match result {
            Ok(()) => log::debug!("Cancelled {:?} on {:?}", outstanding.call, outstanding.service),
            Err(e) => log::warn!("Ignoring failed cancel: {e}"),
        }
    }

    pub fn cancel_all(&mut self) {
        let handles: Vec<_> = self.calls.keys().copied().collect();
        for handle in handles {
            self.cancel(handle);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.calls.len()
    }
}

/// Given to the worker of a [`ThreadedService`] so it can publish feedback
/// and notice cancellation.
#[derive(Clone, Default)]
pub struct Progress {
    feedback: Arc<Mutex<Option<Value>>>,
    cancelled: Arc<AtomicBool>,
}

impl Progress {
    pub fn feedback(&self, value: Value) {
        *self.feedback.lock() = Some(value);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

type Handler = dyn Fn(&RemoteRequest, &Progress) -> Result<Value, String> + Send + Sync;

struct Job {
    progress: Progress,
    result: Receiver<Result<Value, String>>,
}

/// Runs each request on its own thread with a blocking handler.
pub struct ThreadedService {
    handler: Arc<Handler>,
    jobs: HashMap<CallId, Job>,
    next_call: u64,
}

impl ThreadedService {
    pub fn new(
        handler: impl Fn(&RemoteRequest, &Progress) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            jobs: HashMap::new(),
            next_call: 0,
        }
    }
}

impl RemoteService for ThreadedService {
    fn open_session(&mut self, _host: &str) -> Result<(), String> {
        Ok(())
    }

    fn start(&mut self, request: &RemoteRequest) -> Result<CallId, String> {
        let call = CallId(self.next_call);
        self.next_call += 1;
        let (tx, rx) = mpsc::channel();
        let progress = Progress::default();
        let handler = self.handler.clone();
        let worker_progress = progress.clone();
        let request = request.clone();
        std::thread::Builder::new()
            .name(format!("{}-{}", request.service, call.0))
            .spawn(move || {
                // The receiver is gone if the call was cancelled.
                let _ = tx.send(handler(&request, &worker_progress));
            })
            .map_err(|e| e.to_string())?;
        self.jobs.insert(
            call,
            Job {
                progress,
                result: rx,
            },
        );
        Ok(call)
    }

    fn poll(&mut self, call: CallId) -> Result<CallStatus, String> {
        let job = self
            .jobs
            .get(&call)
            .ok_or_else(|| format!("no such call {}", call.0))?;
        match job.result.try_recv() {
            Ok(result) => {
                self.jobs.remove(&call);
                Ok(match result {
                    Ok(value) => CallStatus::Succeeded(value),
                    Err(message) => CallStatus::Failed(message),
                })
            }
            Err(TryRecvError::Empty) => Ok(CallStatus::Pending(job.progress.feedback.lock().clone())),
            Err(TryRecvError::Disconnected) => {
                self.jobs.remove(&call);
                Err("worker thread exited without a result".to_owned())
            }
        }
    }

    fn cancel(&mut self, call: CallId) -> Result<(), String> {
        let job = self
            .jobs
            .remove(&call)
            .ok_or_else(|| format!("no such call {}", call.0))?;
        job.progress.cancelled.store(true, Ordering::Relaxed);
        Ok(())
    }
}
