use once_cell::sync::OnceCell;
use std::fmt;

use crate::value::Row;

/// An immutable pairing of a raw database row with a lazily materialized
/// decoded record. Equality is by row contents only, independent of whether
/// `record()` has been called.
///
/// The decoded value is stored in a [`OnceCell`] rather than eagerly
/// computed: most rows flow through a diff without their record ever being
/// inspected directly (only their row is compared), so materializing on
/// every construction would waste work proportional to result-set size on
/// every commit.
pub struct Item<R> {
    row: Row,
    record: OnceCell<R>,
    decode: Box<dyn Fn(&Row) -> R + Send + Sync>,
    post_fetch: Option<Box<dyn Fn(&mut R) + Send + Sync>>,
}

impl<R> Item<R> {
    /// Takes a defensive copy of `row`: the source row may be backed by a
    /// statement cursor that is reused or freed once the fetch loop moves on.
    pub fn new(
        row: Row,
        decode: impl Fn(&Row) -> R + Send + Sync + 'static,
        post_fetch: Option<Box<dyn Fn(&mut R) + Send + Sync>>,
    ) -> Self {
        Item {
            row,
            record: OnceCell::new(),
            decode: Box::new(decode),
            post_fetch,
        }
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Materializes the record on first access; subsequent calls return the
    /// same instance. A race between two contexts calling this concurrently
    /// is benign: the row decodes deterministically, and `OnceCell` commits
    /// exactly one winner, so the post-fetch hook still runs at most once.
    pub fn record(&self) -> &R {
        self.record.get_or_init(|| {
            let mut record = (self.decode)(&self.row);
            if let Some(hook) = &self.post_fetch {
                hook(&mut record);
            }
            record
        })
    }
}

impl<R> PartialEq for Item<R> {
    fn eq(&self, other: &Self) -> bool {
        self.row == other.row
    }
}

impl<R> Eq for Item<R> {}

impl<R: fmt::Debug> fmt::Debug for Item<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item").field("row", &self.row).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: i64,
    }

    #[test]
    fn equality_is_by_row_not_record() {
        let mut row = Row::new();
        row.set("id", 1i64);
        let a = Item::new(row.clone(), |r| Rec { id: row_id(r) }, None);
        let b = Item::new(row, |r| Rec { id: row_id(r) + 1 }, None);
        assert_eq!(a, b);
        assert_ne!(a.record(), b.record());
    }

    fn row_id(row: &Row) -> i64 {
        match row.get("id") {
            Some(Value::Integer(i)) => *i,
            _ => panic!("missing id"),
        }
    }

    #[test]
    fn record_materializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut row = Row::new();
        row.set("id", 7i64);
        let item = Item::new(
            row,
            move |r| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Rec { id: row_id(r) }
            },
            None,
        );
        assert_eq!(item.record().id, 7);
        assert_eq!(item.record().id, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
