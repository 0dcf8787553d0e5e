//! caproute: a hierarchical capability router.
//!
//! Registers a tree of skills, each advertising triggers and optional
//! children, and deterministically resolves a task request to exactly one
//! leaf handler by walking the hierarchy with tie-break and fallback rules.
//! Every decision is recorded in an append-only audit log.
//!
//! Control flow:
//!
//! ```text
//! TaskRequest -> Resolver(Registry, Matcher) -> Resolution
//!             -> Dispatcher(Handler) -> Result
//! ```

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod matcher;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod router;

pub use audit::{AuditEntry, AuditLog, DispatchOutcome};
pub use config::Config;
pub use dispatch::{
    CancelToken, Context, DispatchError, Dispatcher, Handler, HandlerOutput, HandlerRegistry,
    InMemoryHandlers,
};
pub use matcher::{MatchScore, Matcher, TriggerMatcher};
pub use registry::{
    load_tree, CapabilityRegistry, LoadedTree, RegistryError, SkillNode, Trigger, TriggerKind,
};
pub use request::TaskRequest;
pub use resolver::{resolve, Alternative, Resolution, ResolveError, ResolverPolicy};
pub use router::{RouteError, RouteReport, Router};
