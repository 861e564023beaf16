//! # relcheck: distributed relationship check dispatch
//!
//! relcheck answers "does subject S have relation R on object O?" by
//! expanding relation rewrite rules and spreading the resulting sub-checks
//! over a cluster, so that no single node needs the whole authorization graph.
//!
//! ## Dispatch Pipeline
//!
//! Every stage implements the [`dispatcher::Dispatcher`] capability and holds
//! the next stage it may delegate to:
//!
//! ```text
//! check → Result Cache → Peer Router ─┬─ owned here ─→ Local Evaluator
//!                                     └─ owned by B ─→ node B (Cache → Local Evaluator)
//! ```
//!
//! - Result Cache ([`cache`]): memoizes answers and coalesces concurrent
//!   identical checks into one computation.
//! - Peer Router ([`peer`]): picks the owning node on the consistent hash
//!   ring ([`ring`], [`membership`]) and forwards the check.
//! - Local Evaluator ([`local`]): applies the [`schema`] rules against the
//!   tuple [`store`]. Derived checks re-enter the pipeline from the top, fanned
//!   out through [`join`] when a rule combines several of them.
//!
//! ## Cancellation
//!
//! A [`context::DispatchContext`] travels with every check. Cancelling it, or
//! passing its deadline, stops every outstanding sub-check.
//!
//! ## Wiring
//!
//! [`pipeline::Pipeline`] assembles the chain for one node, either through its
//! builder or from a [`config::NodeConfig`].

pub mod cache;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod join;
pub mod local;
pub mod membership;
pub mod model;
pub mod peer;
pub mod pipeline;
pub mod ring;
pub mod schema;
pub mod store;

// Re-exports
pub use cache::{CacheStats, CachedDispatcher, CheckCache};
pub use config::NodeConfig;
pub use context::DispatchContext;
pub use dispatcher::{Dispatcher, EntryPoint};
pub use error::*;
pub use model::*;
pub use pipeline::Pipeline;
