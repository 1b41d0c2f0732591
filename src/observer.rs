//! Transaction-boundary observation: turns a stream of per-row change
//! notifications into a single recompute decision per commit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::source::Database;

/// The database layer's side of the contract: whatever embeds this crate
/// calls these hooks from its own preupdate/commit/rollback callbacks
/// (e.g. SQLite's `sqlite3_preupdate_hook`/`sqlite3_commit_hook`/
/// `sqlite3_rollback_hook`).
pub trait TransactionObserverSink: Send + Sync {
    /// A row in `table` was inserted, updated or deleted. May be called any
    /// number of times, in any order, before the transaction resolves.
    fn table_changed(&self, table: &str);
    /// The transaction is about to commit, before `committed` fires. Unused
    /// by [`TransactionObserver`] itself; part of the trait for hosts that
    /// need a pre-commit veto point.
    fn will_commit(&self);
    /// The transaction rolled back. Any row changes observed during it are
    /// discarded without triggering a recompute.
    fn rolled_back(&self);
    /// The transaction committed. Recompute happens here, never inside
    /// `table_changed` — a single row-changed call says nothing about
    /// whether the surrounding transaction will stick. `db` is only valid
    /// for the duration of this call; an implementation that needs to
    /// refetch must hand the work off to its own execution context rather
    /// than stash `db` away.
    fn committed(&self, db: &dyn Database);
}

/// Watches one query's source tables across a transaction and dispatches a
/// recompute exactly once per commit that actually touched them.
///
/// `on_dirty_commit` is supplied by the controller and typically wraps a
/// weak reference to it, so that a controller dropped mid-transaction lets
/// the closure no-op on upgrade failure rather than keep the controller
/// alive or panic.
pub struct TransactionObserver {
    tables: HashSet<String>,
    dirty: AtomicBool,
    on_dirty_commit: Box<dyn Fn() + Send + Sync>,
}

impl TransactionObserver {
    pub fn new(tables: HashSet<String>, on_dirty_commit: impl Fn() + Send + Sync + 'static) -> Self {
        TransactionObserver {
            tables,
            dirty: AtomicBool::new(false),
            on_dirty_commit: Box::new(on_dirty_commit),
        }
    }

    pub fn source_tables(&self) -> &HashSet<String> {
        &self.tables
    }

    /// Clears the dirty flag without dispatching a recompute. Used only by
    /// the controller's `perform_fetch` when re-attaching: the fresh fetch
    /// it just ran already reflects every change up to that point, so any
    /// dirt accumulated before the re-attach must not also trigger a
    /// redundant diff.
    pub fn reset(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

impl TransactionObserverSink for TransactionObserver {
    fn table_changed(&self, table: &str) {
        if self.tables.contains(table) {
            tracing::trace!(table, "observed table changed, marking dirty");
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn will_commit(&self) {}

    fn rolled_back(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    fn committed(&self, _db: &dyn Database) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            tracing::debug!(tables = ?self.tables, "commit touched observed tables, dispatching recompute");
            (self.on_dirty_commit)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as StdHashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct NoDatabase;
    impl Database for NoDatabase {
        fn prepare(&self, _sql: &str) -> Result<Box<dyn crate::source::Statement>, crate::error::Error> {
            unreachable!("tests never call through to the database")
        }
    }

    fn observer(tables: &[&str], fired: Arc<AtomicUsize>) -> TransactionObserver {
        TransactionObserver::new(
            tables.iter().map(|t| t.to_string()).collect::<StdHashSet<_>>(),
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn commit_without_relevant_change_does_not_recompute() {
        let fired = Arc::new(AtomicUsize::new(0));
        let obs = observer(&["people"], fired.clone());
        obs.table_changed("other_table");
        obs.committed(&NoDatabase);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn commit_with_relevant_change_recomputes_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let obs = observer(&["people"], fired.clone());
        obs.table_changed("people");
        obs.table_changed("people");
        obs.committed(&NoDatabase);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rollback_suppresses_recompute() {
        let fired = Arc::new(AtomicUsize::new(0));
        let obs = observer(&["people"], fired.clone());
        obs.table_changed("people");
        obs.rolled_back();
        obs.committed(&NoDatabase);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_clears_dirty_without_recomputing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let obs = observer(&["people"], fired.clone());
        obs.table_changed("people");
        obs.reset();
        obs.committed(&NoDatabase);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dirty_flag_resets_after_commit() {
        let fired = Arc::new(AtomicUsize::new(0));
        let obs = observer(&["people"], fired.clone());
        obs.table_changed("people");
        obs.committed(&NoDatabase);
        obs.committed(&NoDatabase);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
