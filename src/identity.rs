use crate::source::Database;

/// A binary predicate deciding whether two decoded records denote the same
/// logical entity (e.g. they share a primary key).
///
/// Identity must be stable across post-fetch hook re-invocation: if a hook
/// mutates the record during materialization, the fields this predicate
/// inspects must already hold their final value after the hook's first
/// (and only) invocation, since [`crate::item::Item`] only ever decodes a
/// row once.
pub struct RecordIdentity<R> {
    same: Box<dyn Fn(&R, &R) -> bool + Send + Sync>,
}

impl<R> RecordIdentity<R> {
    pub fn new(same: impl Fn(&R, &R) -> bool + Send + Sync + 'static) -> Self {
        RecordIdentity { same: Box::new(same) }
    }

    /// The default predicate: every record is distinct from every other.
    pub fn never() -> Self
    where
        R: 'static,
    {
        RecordIdentity::new(|_, _| false)
    }

    pub fn same(&self, a: &R, b: &R) -> bool {
        (self.same)(a, b)
    }
}

impl<R: 'static> Default for RecordIdentity<R> {
    fn default() -> Self {
        RecordIdentity::never()
    }
}

/// Adopted by record types whose primary key can be compared using only the
/// database's schema, without decoding a full row. Lets a controller ask for
/// "compare by primary key" identity without supplying its own predicate.
pub trait Persistable {
    /// Builds a primary-key equality comparator from `db`'s schema.
    fn primary_key_comparator(db: &dyn Database) -> Box<dyn Fn(&Self, &Self) -> bool + Send + Sync>;
}

/// Defers identity construction until a database handle is available.
///
/// Primary-key-based identity needs the schema, which only `perform_fetch`
/// can supply; an explicit predicate doesn't need `db` at all but is still
/// threaded through the same interface so the controller has one uniform
/// "build identity, once, at first fetch" step regardless of which mode was
/// requested. Consumed exactly once, by that first fetch.
pub struct IdentityBuilder<R>(Box<dyn FnOnce(&dyn Database) -> RecordIdentity<R> + Send>);

impl<R: 'static> IdentityBuilder<R> {
    /// Every record distinct from every other (the default).
    pub fn never() -> Self {
        IdentityBuilder(Box::new(|_db| RecordIdentity::never()))
    }

    /// A caller-supplied predicate, independent of the database schema.
    pub fn explicit(identity: RecordIdentity<R>) -> Self {
        IdentityBuilder(Box::new(move |_db| identity))
    }

    /// Compares records by primary key, via `R`'s [`Persistable`] capability.
    pub fn primary_key() -> Self
    where
        R: Persistable,
    {
        IdentityBuilder(Box::new(|db| RecordIdentity { same: R::primary_key_comparator(db) }))
    }

    pub fn build(self, db: &dyn Database) -> RecordIdentity<R> {
        (self.0)(db)
    }
}

impl<R: 'static> Default for IdentityBuilder<R> {
    fn default() -> Self {
        IdentityBuilder::never()
    }
}
