//! Request Dispatcher Module
//!
//! Turns one framed request into one response. The transports hand raw bytes
//! to a [`Handler`]; the [`Dispatcher`] is the handler that decodes the
//! envelope and runs it against the display registry.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::display::DisplayRegistry;
use crate::protocol::{Command, Display, PROTOCOL_VERSION, PingInfo, ReplyRoute, Request, Response};
use crate::transport::peer::current_uid;

/// What to send back, and where else to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Serialized response envelope
    pub response: Vec<u8>,
    /// Secondary destinations named by the request
    pub route: ReplyRoute,
}

impl Outcome {
    pub fn new(response: &Response, route: ReplyRoute) -> Self {
        Self {
            response: response.to_bytes(),
            route,
        }
    }
}

/// Anything that can answer a framed request.
///
/// Implementations must not fail: every problem with the request becomes an
/// error envelope inside the [`Outcome`].
pub trait Handler: Send + Sync {
    fn handle(&self, request: &[u8]) -> Outcome;
}

/// Command dispatcher owning the display registry.
pub struct Dispatcher {
    registry: Mutex<DisplayRegistry>,
    started: Instant,
}

impl Dispatcher {
    pub fn new(registry: DisplayRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
            started: Instant::now(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, DisplayRegistry> {
        // The registry holds plain data, so a poisoned lock is still consistent.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one decoded command.
    ///
    /// The registry lock is taken only around the state transition itself.
    pub fn execute(&self, command: &Command) -> Response {
        let result = match command {
            Command::Create(params) => {
                let created = self.registry().create(params);
                created.map(|record| {
                    info!(
                        "Created display {} \"{}\" ({}x{}@{})",
                        record.id, record.name, record.width, record.height, record.refresh_rate
                    );
                    Response::created(record)
                })
            }
            Command::Remove { display_id } => {
                let removed = self.registry().remove(*display_id);
                removed.map(|record| {
                    info!("Removed display {}", record.id);
                    Response::removed(record.id)
                })
            }
            Command::List => Ok(Response::listing(self.snapshot())),
            Command::Ping => Ok(Response::pong(&self.ping_info())),
        };

        result.unwrap_or_else(|e| {
            warn!("{} failed: {}", command.name(), e);
            Response::error(&e)
        })
    }

    /// Decode `bytes` and run the command.
    pub fn dispatch(&self, bytes: &[u8]) -> (Response, ReplyRoute) {
        match Request::decode(bytes) {
            Ok(request) => {
                debug!("Received command: {}", request.command.name());
                (self.execute(&request.command), request.route)
            }
            Err(rejected) => {
                warn!("Rejected request: {}", rejected.error);
                (Response::error(&rejected.error), rejected.route)
            }
        }
    }

    /// Current displays in registry order.
    pub fn snapshot(&self) -> Vec<Display> {
        self.registry().list()
    }

    pub fn ping_info(&self) -> PingInfo {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        PingInfo {
            version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
            pid: std::process::id(),
            uid: current_uid(),
            hostname,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DisplayRegistry::new())
    }
}

impl Handler for Dispatcher {
    fn handle(&self, request: &[u8]) -> Outcome {
        let (response, route) = self.dispatch(request);
        Outcome::new(&response, route)
    }
}

