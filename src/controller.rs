//! The reactive controller itself: owns the two snapshots, the diff and
//! consumer execution contexts, and the delegate dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::change::{FetchedRecordsEvent, ItemChange};
use crate::concurrency::ThreadContext;
use crate::diff::diff;
use crate::error::Error;
use crate::identity::{IdentityBuilder, Persistable, RecordIdentity};
use crate::item::Item;
use crate::observer::{TransactionObserver, TransactionObserverSink};
use crate::source::{run_on_writer, DatabaseWriter, QuerySource};
use crate::value::Row;

/// Receives notifications as the controller's projection changes.
///
/// Mirrors GRDB's `FetchedRecordsControllerDelegate`: every method has a
/// no-op default, so an implementer only overrides what it needs.
pub trait FetchedRecordsDelegate<R>: Send + Sync {
    /// About to apply a batch of changes; `controller.fetched_records()`
    /// still reflects the previous state.
    fn will_change_records(&self, controller: &FetchedRecordsController<R>) {
        let _ = controller;
    }
    /// One event from the batch. Fired in the edit script's own order:
    /// non-update events first, then updates.
    fn did_change_record(&self, controller: &FetchedRecordsController<R>, event: FetchedRecordsEvent<R>) {
        let _ = (controller, event);
    }
    /// The batch has been fully applied; `controller.fetched_records()` now
    /// reflects the new state.
    fn did_change_records(&self, controller: &FetchedRecordsController<R>) {
        let _ = controller;
    }
    /// A commit-triggered refetch failed. The controller remains attached:
    /// the next committed transaction gets its own attempt.
    fn did_fail(&self, controller: &FetchedRecordsController<R>, error: Error) {
        let _ = (controller, error);
    }
}

/// A single-section snapshot, returned by [`FetchedRecordsController::sections`].
pub struct Section<R> {
    records: Vec<R>,
}

impl<R> Section<R> {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }
}

struct Shared<R> {
    writer: Arc<dyn DatabaseWriter>,
    source: QuerySource,
    make_record: Arc<dyn Fn(&Row) -> R + Send + Sync>,
    post_fetch: Option<Arc<dyn Fn(&mut R) + Send + Sync>>,
    identity_builder: Mutex<Option<IdentityBuilder<R>>>,
    identity: Mutex<Option<Arc<RecordIdentity<R>>>>,
    diff_context: ThreadContext,
    consumer_context: ThreadContext,
    main_snapshot: Mutex<Vec<Item<R>>>,
    diff_snapshot: Mutex<Vec<Item<R>>>,
    delegate: Mutex<Option<Weak<dyn FetchedRecordsDelegate<R>>>>,
    attached: AtomicBool,
    observer: Mutex<Option<Arc<TransactionObserver>>>,
}

/// A reactive projection of a query's result set, kept in sync with a live
/// database. See the crate root for the full pipeline description.
pub struct FetchedRecordsController<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for FetchedRecordsController<R> {
    fn clone(&self) -> Self {
        FetchedRecordsController { shared: Arc::clone(&self.shared) }
    }
}

impl<R: Clone + Send + Sync + 'static> FetchedRecordsController<R> {
    pub fn new(
        writer: Arc<dyn DatabaseWriter>,
        source: QuerySource,
        make_record: impl Fn(&Row) -> R + Send + Sync + 'static,
    ) -> Self {
        FetchedRecordsController {
            shared: Arc::new(Shared {
                writer,
                source,
                make_record: Arc::new(make_record),
                post_fetch: None,
                identity_builder: Mutex::new(Some(IdentityBuilder::never())),
                identity: Mutex::new(None),
                diff_context: ThreadContext::new("fetched-records-diff"),
                consumer_context: ThreadContext::new("fetched-records-consumer"),
                main_snapshot: Mutex::new(Vec::new()),
                diff_snapshot: Mutex::new(Vec::new()),
                delegate: Mutex::new(None),
                attached: AtomicBool::new(false),
                observer: Mutex::new(None),
            }),
        }
    }

    /// Sets the identity predicate used to recognize moves and updates.
    /// Must be called before the controller is cloned or attached (i.e.
    /// right after `new`), since it needs exclusive access to the shared
    /// state. The predicate itself is only built into a live
    /// [`RecordIdentity`] by the first `perform_fetch`.
    pub fn with_identity(mut self, identity: RecordIdentity<R>) -> Self {
        *Arc::get_mut(&mut self.shared)
            .expect("with_identity must run before the controller is cloned or shared")
            .identity_builder
            .get_mut()
            .unwrap() = Some(IdentityBuilder::explicit(identity));
        self
    }

    /// Sets a hook run once per record, the first time it is decoded.
    /// Same ordering requirement as [`Self::with_identity`].
    pub fn with_post_fetch(mut self, hook: impl Fn(&mut R) + Send + Sync + 'static) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("with_post_fetch must run before the controller is cloned or shared")
            .post_fetch = Some(Arc::new(hook));
        self
    }

    pub fn set_delegate(&self, delegate: Weak<dyn FetchedRecordsDelegate<R>>) {
        *self.shared.delegate.lock().unwrap() = Some(delegate);
    }

    /// The current projection, in order, or `None` before the first
    /// `perform_fetch`.
    pub fn fetched_records(&self) -> Option<Vec<R>> {
        if !self.shared.attached.load(Ordering::Acquire) {
            return None;
        }
        Some(self.shared.main_snapshot.lock().unwrap().iter().map(|item| item.record().clone()).collect())
    }

    /// The record at `index`. Out-of-range is a programmer error, like
    /// indexing a `Vec` out of bounds.
    pub fn record_at(&self, index: usize) -> R {
        self.shared
            .main_snapshot
            .lock()
            .unwrap()
            .get(index)
            .unwrap_or_else(|| panic!("record_at({index}): out of range"))
            .record()
            .clone()
    }

    /// The index of the first record `identity` considers the same as
    /// `record`, if any.
    pub fn index_of(&self, record: &R) -> Option<usize> {
        let identity = current_identity(&self.shared);
        let main = self.shared.main_snapshot.lock().unwrap();
        main.iter().position(|item| identity.same(item.record(), record))
    }

    pub fn count(&self) -> usize {
        self.shared.main_snapshot.lock().unwrap().len()
    }

    /// A single-section view over the current projection. This crate has
    /// no concept of multiple sections.
    pub fn sections(&self) -> Section<R> {
        Section { records: self.fetched_records().unwrap_or_default() }
    }

    /// Prepares the statement, runs the initial fetch, and (on the first
    /// call) attaches the transaction observer so future commits trigger
    /// diffs. A [`ConfigurationError`](crate::error::ConfigurationError) at
    /// this point is returned synchronously and the controller stays
    /// unattached.
    ///
    /// Calling this again after the first successful call does not
    /// refetch: it resynchronizes the diff baseline with whatever
    /// `fetched_records()` currently reports, which is the only behavior
    /// consistent with diffing always being computed against the
    /// immediately preceding accepted transaction once re-attachment is
    /// allowed at all.
    #[tracing::instrument(skip_all)]
    pub fn perform_fetch(&self) -> Result<(), Error> {
        if self.shared.attached.load(Ordering::Acquire) {
            self.resync_diff_baseline();
            return Ok(());
        }

        // `attached` flips to true only once every step below, including the
        // fallible prepare/fetch, has actually succeeded. The identity
        // builder is likewise only taken once prepare/fetch has already
        // returned its rows, so a failed attempt leaves both untouched and a
        // later retry starts from exactly the same unattached state.
        let prepare_shared = Arc::clone(&self.shared);
        let (rows, tables, identity) = run_on_writer(self.shared.writer.as_ref(), move |db| {
            let (mut statement, tables) = prepare_shared.source.prepare(db)?;
            let rows = statement.fetch_all()?;
            let builder = prepare_shared
                .identity_builder
                .lock()
                .unwrap()
                .take()
                .expect("identity builder is only taken once, by the first successful perform_fetch");
            let identity = builder.build(db);
            Ok::<_, Error>((rows, tables, identity))
        })?;

        *self.shared.identity.lock().unwrap() = Some(Arc::new(identity));
        let main_items = build_items(&self.shared, rows.clone());
        let diff_items = build_items(&self.shared, rows);
        *self.shared.main_snapshot.lock().unwrap() = main_items;
        *self.shared.diff_snapshot.lock().unwrap() = diff_items;

        let weak_shared = Arc::downgrade(&self.shared);
        let observer = Arc::new(TransactionObserver::new(tables, move || match weak_shared.upgrade() {
            Some(shared) => schedule_diff(&shared),
            None => tracing::warn!("controller dropped before a dirty commit could be diffed"),
        }));
        self.shared.writer.add_transaction_observer(Arc::clone(&observer) as Arc<dyn TransactionObserverSink>);
        *self.shared.observer.lock().unwrap() = Some(observer);
        self.shared.attached.store(true, Ordering::Release);

        Ok(())
    }

    /// Resynchronizes the diff baseline with the current main snapshot and
    /// clears any dirt the observer accumulated before this call, since the
    /// baseline it would have diffed against is about to be replaced anyway.
    /// `diff_snapshot` is owned by the diff context, so the write happens
    /// there, as a synchronous job, rather than from the caller's thread.
    fn resync_diff_baseline(&self) {
        let rows: Vec<Row> = {
            let main = self.shared.main_snapshot.lock().unwrap();
            main.iter().map(|item| item.row().clone()).collect()
        };
        let shared = Arc::clone(&self.shared);
        self.shared.diff_context.dispatch_sync(move || {
            *shared.diff_snapshot.lock().unwrap() = build_items(&shared, rows);
            if let Some(observer) = shared.observer.lock().unwrap().as_ref() {
                observer.reset();
            }
        });
    }
}

impl<R: Clone + Send + Sync + Persistable + 'static> FetchedRecordsController<R> {
    /// Identifies records by primary key instead of an explicit predicate.
    /// The comparator is built from the database schema inside the first
    /// `perform_fetch`, so this only requests the mode; same ordering
    /// requirement as [`Self::with_identity`].
    pub fn with_identity_by_primary_key(mut self) -> Self {
        *Arc::get_mut(&mut self.shared)
            .expect("with_identity_by_primary_key must run before the controller is cloned or shared")
            .identity_builder
            .get_mut()
            .unwrap() = Some(IdentityBuilder::primary_key());
        self
    }
}

fn build_items<R: Send + Sync + 'static>(shared: &Arc<Shared<R>>, rows: Vec<Row>) -> Vec<Item<R>> {
    rows.into_iter()
        .map(|row| {
            let make_record = Arc::clone(&shared.make_record);
            let post_fetch = shared.post_fetch.as_ref().map(|hook| {
                let hook = Arc::clone(hook);
                Box::new(move |record: &mut R| (*hook)(record)) as Box<dyn Fn(&mut R) + Send + Sync>
            });
            Item::new(row, move |r| (*make_record)(r), post_fetch)
        })
        .collect()
}

fn current_delegate<R>(shared: &Shared<R>) -> Option<Arc<dyn FetchedRecordsDelegate<R>>> {
    shared.delegate.lock().unwrap().as_ref().and_then(Weak::upgrade)
}

/// The identity built by the first successful `perform_fetch`, or the
/// "never" default if called before attachment (when `main_snapshot` is
/// still empty anyway, so no merge decision is ever actually made against it).
fn current_identity<R: 'static>(shared: &Shared<R>) -> Arc<RecordIdentity<R>> {
    shared.identity.lock().unwrap().clone().unwrap_or_else(|| Arc::new(RecordIdentity::never()))
}

fn schedule_diff<R: Clone + Send + Sync + 'static>(shared: &Arc<Shared<R>>) {
    let shared_for_job = Arc::clone(shared);
    shared.diff_context.dispatch(move || run_diff(shared_for_job));
}

#[tracing::instrument(skip_all)]
fn run_diff<R: Clone + Send + Sync + 'static>(shared: Arc<Shared<R>>) {
    let prepare_shared = Arc::clone(&shared);
    let fetched = run_on_writer(shared.writer.as_ref(), move |db| -> Result<Vec<Row>, Error> {
        let (mut statement, _tables) = prepare_shared.source.prepare(db)?;
        statement.fetch_all()
    });

    let rows = match fetched {
        Ok(rows) => rows,
        Err(error) => {
            notify_failure(&shared, error);
            return;
        }
    };

    let identity = current_identity(&shared);
    let new_for_diff = build_items(&shared, rows.clone());
    let new_for_snapshot = build_items(&shared, rows.clone());
    let old = std::mem::take(&mut *shared.diff_snapshot.lock().unwrap());
    let script = diff(old, new_for_diff, &identity);
    *shared.diff_snapshot.lock().unwrap() = new_for_snapshot;

    if script.is_empty() {
        tracing::debug!("recompute produced no changes");
        return;
    }
    tracing::debug!(events = script.len(), "diff computed, dispatching to consumer");

    let shared_for_consumer = Arc::clone(&shared);
    shared.consumer_context.dispatch(move || deliver(shared_for_consumer, rows, script));
}

fn controller_handle<R>(shared: &Arc<Shared<R>>) -> FetchedRecordsController<R> {
    FetchedRecordsController { shared: Arc::clone(shared) }
}

fn deliver<R: Clone + Send + Sync + 'static>(shared: Arc<Shared<R>>, rows: Vec<Row>, script: Vec<ItemChange<R>>) {
    let consumer_items = build_items(&shared, rows);
    let controller = controller_handle(&shared);

    if let Some(delegate) = current_delegate(&shared) {
        delegate.will_change_records(&controller);
    }
    *shared.main_snapshot.lock().unwrap() = consumer_items;
    for change in script {
        if let Some(delegate) = current_delegate(&shared) {
            delegate.did_change_record(&controller, change.to_event());
        }
    }
    if let Some(delegate) = current_delegate(&shared) {
        delegate.did_change_records(&controller);
    }
}

fn notify_failure<R: Clone + Send + Sync + 'static>(shared: &Arc<Shared<R>>, error: Error) {
    tracing::error!(%error, "commit-triggered refetch failed");
    let shared_for_job = Arc::clone(shared);
    shared.consumer_context.dispatch(move || {
        let controller = controller_handle(&shared_for_job);
        if let Some(delegate) = current_delegate(&shared_for_job) {
            delegate.did_fail(&controller, error);
        }
    });
}
