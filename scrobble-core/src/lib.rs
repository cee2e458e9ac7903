//! Source polling engine and recent-window reconciliation core for a
//! multi-client scrobbler.
//!
//! A process owns one [`poller::Poller`] per configured upstream source.
//! Each poller drives a fetch/validate/dispatch/sleep cycle (§4.1) against a
//! [`adapter::SourceAdapter`] it holds, classifying newly observed plays
//! either by timestamp or, for upstreams whose recent-items list can
//! reshuffle, via the [`reconciler`] module, then hands them to a
//! [`dispatcher::Dispatcher`] for downstream scrobbling.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod loopback;
pub mod play;
pub mod poller;
pub mod reconciler;

pub use adapter::{CycleOutcome, ReconciliationStrategy, SourceAdapter};
pub use clock::{Clock, SystemClock};
pub use config::{PollerConfig, ScrobbleConfig};
pub use dispatcher::{DispatchOptions, Dispatcher, LoopbackDispatcher};
pub use error::{Result, ScrobbleError};
pub use loopback::LoopbackAdapter;
pub use play::{PlayData, PlayKey, PlayMeta, PlayRecord};
pub use poller::{Poller, PollerPhase, PollerStatus};
pub use reconciler::{reconcile, ChangeKind, Diff, DiffEntry, ReconciliationKind, ReconcileOutcome};

#[cfg(test)]
pub use clock::FakeClock;
