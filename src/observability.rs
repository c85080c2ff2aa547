//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log targets used by the crate so subscribers can filter
//! provisioning and supervision events without pulling in unrelated
//! application logs.

/// Target used by lifecycle spans and general logs.
pub(crate) const LOG_TARGET: &str = "mongo_ephemeral::observability";

/// Target used by release resolution.
pub(crate) const RESOLVER_TARGET: &str = "mongo_ephemeral::resolver";

/// Target used by download, extraction, and cache lookups.
pub(crate) const CACHE_TARGET: &str = "mongo_ephemeral::cache";

/// Target used by the `mongod` supervisor.
pub(crate) const SUPERVISOR_TARGET: &str = "mongo_ephemeral::supervisor";

/// Target used by the process registry and its exit hooks.
pub(crate) const REGISTRY_TARGET: &str = "mongo_ephemeral::registry";
