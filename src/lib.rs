//! outpost — outbound-messaging gateway core
//!
//! Per-session dispatch queues with layered sliding-window rate limiting,
//! human-like send pacing, bounded retry, and a session-identity
//! deduplication state machine. The actual transport (connecting,
//! authenticating, putting bytes on the wire) and the persistence of
//! session records are external collaborators behind the [`transport`]
//! and [`sessions`] seams.

pub mod config;
pub mod limiter;
pub mod queue;
pub mod sessions;
pub mod transport;

pub use config::GatewayConfig;
pub use limiter::RateLimiter;
pub use queue::dispatch::DispatchQueue;
pub use sessions::lifecycle::LifecycleManager;
