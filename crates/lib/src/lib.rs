//! forge-lib: core of the forge build orchestrator.
//!
//! A build is one invocation over a set of input packages. The pipeline:
//!
//! 1. The [`catalog`] discovers packages on disk.
//! 2. The [`metadata`] resolver loads each input package's config and
//!    consolidates its transitive dependency closure.
//! 3. The [`planner`] walks source trees, consults the [`oracle`] for
//!    staleness, and enqueues stage-tagged deferred commands.
//! 4. The [`queue`] executes stages in order on a bounded worker pool,
//!    recording discovered compile inputs back into the oracle.
//!
//! All mutable state lives in a [`context::BuildContext`] that is
//! threaded through every component; there are no process-wide tables.

pub mod catalog;
pub mod config;
pub mod context;
pub mod invocation;
pub mod metadata;
pub mod oracle;
pub mod package_id;
pub mod placeholder;
pub mod planner;
pub mod queue;
pub mod runner;
pub mod stamp;
pub mod store;
pub mod tooling;
