//! Dispatch: invoke the external handler a resolution points at.
//!
//! The handler runs on a worker thread and the outcome is awaited over an
//! mpsc channel so the caller-configured timeout and cancellation are
//! enforced without the handler's cooperation. Exactly one handler
//! invocation per dispatch call; retry policy belongs to the caller.

use crate::resolver::Resolution;
use crate::request::TaskRequest;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Normalized context a handler is invoked with: the request plus the path
/// that reached it
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub raw_text: String,
    pub hints: HashMap<String, String>,
    /// Resolution path, so the handler knows how it was reached
    pub path: Vec<String>,
}

impl Context {
    pub fn from_request(request: &TaskRequest, path: Vec<String>) -> Self {
        Self {
            raw_text: request.raw_text.clone(),
            hints: request.hints.clone(),
            path,
        }
    }
}

/// Normalized handler result
#[derive(Debug, Clone, Serialize)]
pub struct HandlerOutput {
    pub handler_ref: String,
    pub payload: Value,
    /// Filled in by the dispatcher
    pub duration_ms: u64,
}

impl HandlerOutput {
    pub fn new(handler_ref: &str, payload: Value) -> Self {
        Self {
            handler_ref: handler_ref.to_string(),
            payload,
            duration_ms: 0,
        }
    }
}

/// The external unit of work a leaf skill delegates to
pub trait Handler: Send + Sync {
    fn invoke(&self, ctx: &Context) -> Result<HandlerOutput>;
}

/// Narrow lookup contract onto whatever holds the actual agents/tools
pub trait HandlerRegistry: Send + Sync {
    fn lookup(&self, handler_ref: &str) -> Option<Arc<dyn Handler>>;
}

/// Concurrent in-memory handler registry; enough for the CLI, tests, and
/// embedders that wire handlers up at startup
#[derive(Default)]
pub struct InMemoryHandlers {
    map: DashMap<String, Arc<dyn Handler>>,
}

impl InMemoryHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<H: Handler + 'static>(&self, handler_ref: &str, handler: H) {
        self.map.insert(handler_ref.to_string(), Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl HandlerRegistry for InMemoryHandlers {
    fn lookup(&self, handler_ref: &str) -> Option<Arc<dyn Handler>> {
        self.map.get(handler_ref).map(|h| h.value().clone())
    }
}

/// Built-in handler that serves a skill's own document body. This is the
/// router's "static reference content" role: the leaf delegates to the
/// methodology write-up it was declared with.
pub struct DocHandler {
    skill_id: String,
    instructions: String,
}

impl DocHandler {
    pub fn new(skill_id: &str, instructions: &str) -> Self {
        Self {
            skill_id: skill_id.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

impl Handler for DocHandler {
    fn invoke(&self, ctx: &Context) -> Result<HandlerOutput> {
        Ok(HandlerOutput::new(
            &format!("doc:{}", self.skill_id),
            json!({
                "skill": self.skill_id,
                "reached_via": ctx.path,
                "instructions": self.instructions,
            }),
        ))
    }
}

/// Dispatch-time errors; recoverable per-request
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("resolution carries no terminal handler")]
    Unresolved,
    #[error("handler `{handler_ref}` is not registered")]
    UnknownHandler { handler_ref: String },
    #[error("handler failed: {0}")]
    HandlerFailed(anyhow::Error),
    #[error("handler timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("dispatch cancelled")]
    Cancelled,
}

/// Caller-held cancellation flag for an in-flight dispatch
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Invokes resolved handlers with a bounded wait
pub struct Dispatcher {
    handlers: Arc<dyn HandlerRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(handlers: Arc<dyn HandlerRegistry>, timeout: Duration) -> Self {
        Self { handlers, timeout }
    }

    pub fn dispatch(
        &self,
        resolution: &Resolution,
        ctx: Context,
    ) -> Result<HandlerOutput, DispatchError> {
        self.dispatch_with_cancel(resolution, ctx, &CancelToken::new())
    }

    /// Invoke the terminal handler, polling the cancel token while waiting.
    /// On timeout or cancellation the worker thread is left to finish on its
    /// own; its send into the dropped channel is ignored.
    pub fn dispatch_with_cancel(
        &self,
        resolution: &Resolution,
        ctx: Context,
        cancel: &CancelToken,
    ) -> Result<HandlerOutput, DispatchError> {
        let handler_ref = resolution
            .terminal_handler_ref
            .as_deref()
            .ok_or(DispatchError::Unresolved)?;
        let handler =
            self.handlers
                .lookup(handler_ref)
                .ok_or_else(|| DispatchError::UnknownHandler {
                    handler_ref: handler_ref.to_string(),
                })?;

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        thread::spawn(move || {
            let _ = tx.send(handler.invoke(&ctx));
        });

        let deadline = started + self.timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DispatchError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            let slice = (deadline - now).min(Duration::from_millis(25));
            match rx.recv_timeout(slice) {
                Ok(Ok(mut output)) => {
                    output.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(output);
                }
                Ok(Err(e)) => return Err(DispatchError::HandlerFailed(e)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DispatchError::HandlerFailed(anyhow!(
                        "handler thread exited without a result"
                    )))
                }
            }
        }
    }
}
