//! Router facade: resolve, dispatch, and audit in one call.

use crate::audit::{AuditEntry, AuditLog, DispatchOutcome};
use crate::config::Config;
use crate::dispatch::{CancelToken, Context, DispatchError, Dispatcher, HandlerRegistry};
use crate::matcher::{Matcher, TriggerMatcher};
use crate::metrics;
use crate::registry::CapabilityRegistry;
use crate::request::TaskRequest;
use crate::resolver::{self, Alternative, Resolution, ResolveError, ResolverPolicy};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const SUMMARY_PREVIEW_LEN: usize = 120;

/// What the caller gets back from a successful `route_and_dispatch`
#[derive(Debug, Clone, Serialize)]
pub struct RouteReport {
    pub path: Vec<String>,
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub fallback_steps: u32,
    pub outcome: DispatchOutcome,
    pub payload: Value,
}

/// Per-request routing failures, split so callers can map exit codes
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("dispatch failed: {source}")]
    Dispatch {
        #[source]
        source: DispatchError,
        /// The resolution that was reached before dispatch failed
        resolution: Resolution,
    },
}

/// Immutable routing service: a registry, a matcher, a dispatcher, and the
/// audit sink. Safe to share across threads; resolutions only read state.
pub struct Router {
    registry: CapabilityRegistry,
    matcher: Box<dyn Matcher>,
    policy: ResolverPolicy,
    dispatcher: Dispatcher,
    audit: AuditLog,
}

impl Router {
    pub fn new(
        registry: CapabilityRegistry,
        handlers: Arc<dyn HandlerRegistry>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let audit = AuditLog::open(&config.audit)?;
        Ok(Self {
            registry,
            matcher: Box::new(TriggerMatcher),
            policy: config.resolver.clone(),
            dispatcher: Dispatcher::new(
                handlers,
                Duration::from_millis(config.dispatch.timeout_ms),
            ),
            audit,
        })
    }

    /// Swap in a different scoring implementation
    pub fn with_matcher<M: Matcher + 'static>(mut self, matcher: M) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn route_and_dispatch(
        &self,
        request: &TaskRequest,
    ) -> Result<RouteReport, RouteError> {
        self.route_and_dispatch_with_cancel(request, &CancelToken::new())
    }

    /// The single entry point: resolve the request, invoke the terminal
    /// handler, and record exactly one audit entry whatever the outcome.
    pub fn route_and_dispatch_with_cancel(
        &self,
        request: &TaskRequest,
        cancel: &CancelToken,
    ) -> Result<RouteReport, RouteError> {
        let digest = request.digest();
        let started = Instant::now();

        let resolution = match resolver::resolve(
            &self.registry,
            self.matcher.as_ref(),
            request,
            &self.policy,
        ) {
            Ok(r) => r,
            Err(err) => {
                let outcome = match &err {
                    ResolveError::NoMatch { .. } => DispatchOutcome::NoMatch,
                    ResolveError::MaxDepthExceeded { .. } => DispatchOutcome::MaxDepthExceeded,
                };
                metrics::record_resolution(outcome.label(), elapsed_ms(started));
                self.audit
                    .record(AuditEntry::unresolved(digest, err.path(), outcome));
                return Err(err.into());
            }
        };
        metrics::record_resolution("resolved", elapsed_ms(started));

        let ctx = Context::from_request(request, resolution.path.clone());
        match self
            .dispatcher
            .dispatch_with_cancel(&resolution, ctx, cancel)
        {
            Ok(output) => {
                let outcome = DispatchOutcome::Completed {
                    summary: preview(&output.payload),
                };
                metrics::record_dispatch(outcome.label());
                self.audit
                    .record(AuditEntry::new(digest, &resolution, outcome.clone()));
                Ok(RouteReport {
                    path: resolution.path,
                    confidence: resolution.confidence,
                    alternatives: resolution.alternatives,
                    fallback_steps: resolution.fallback_steps,
                    outcome,
                    payload: output.payload,
                })
            }
            Err(err) => {
                let (outcome, status) = match &err {
                    DispatchError::HandlerFailed(inner) => (
                        DispatchOutcome::HandlerFailed {
                            error: inner.to_string(),
                        },
                        "handler_failed",
                    ),
                    DispatchError::Timeout { timeout_ms } => (
                        DispatchOutcome::Timeout {
                            timeout_ms: *timeout_ms,
                        },
                        "timeout",
                    ),
                    DispatchError::Cancelled => (DispatchOutcome::Cancelled, "cancelled"),
                    DispatchError::Unresolved => (DispatchOutcome::Unresolved, "unresolved"),
                    DispatchError::UnknownHandler { handler_ref } => (
                        DispatchOutcome::HandlerFailed {
                            error: format!("handler `{}` is not registered", handler_ref),
                        },
                        "unknown_handler",
                    ),
                };
                metrics::record_dispatch(status);
                self.audit
                    .record(AuditEntry::new(digest, &resolution, outcome));
                Err(RouteError::Dispatch {
                    source: err,
                    resolution,
                })
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

/// Truncated payload preview for the audit summary
fn preview(payload: &Value) -> String {
    let mut s = payload.to_string();
    if s.len() > SUMMARY_PREVIEW_LEN {
        s.truncate(
            (0..=SUMMARY_PREVIEW_LEN)
                .rev()
                .find(|i| s.is_char_boundary(*i))
                .unwrap_or(0),
        );
        s.push('…');
    }
    s
}
