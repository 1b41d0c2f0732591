//! A reactive controller that keeps an ordered projection of a SQL query's
//! result set in sync with a live database.
//!
//! The pipeline has three serial stages:
//!
//! 1. **Writer** — the host's own serial write queue ([`DatabaseWriter`]).
//!    Every statement execution, including the refetches this crate issues,
//!    runs there.
//! 2. **Diff context** — a dedicated background thread. On each commit that
//!    touched the query's source tables, it refetches, computes the minimal
//!    edit script against the previous fetch, and updates its private
//!    baseline immediately (so a second commit landing mid-diff diffs
//!    against the right prior state even if the consumer context is still
//!    behind).
//! 3. **Consumer context** — a second dedicated thread. It rebuilds the
//!    public snapshot and fires delegate callbacks in order:
//!    `will_change_records`, one `did_change_record` per event, then
//!    `did_change_records`.
//!
//! Grounded throughout on GRDB's `FetchedRecordsController` (the origin of
//! this design) and on this workspace's subscription/diff machinery for the
//! Rust idioms.

mod change;
mod concurrency;
mod controller;
mod diff;
mod error;
mod identity;
mod item;
mod observer;
mod source;
mod value;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use change::{FetchedRecordsEvent, IndexPath, ItemChange};
pub use controller::{FetchedRecordsController, FetchedRecordsDelegate, Section};
pub use error::{ConfigurationError, Error, FetchError};
pub use identity::{IdentityBuilder, Persistable, RecordIdentity};
pub use item::Item;
pub use observer::{TransactionObserver, TransactionObserverSink};
pub use source::{run_on_writer, Database, DatabaseWriter, QueryBuilderRequest, QuerySource, Statement};
pub use value::{Row, Value};
