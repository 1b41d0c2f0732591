use indexmap::IndexMap;

use crate::item::Item;
use crate::value::Value;

/// Internal edit-script atom produced by the diff engine.
pub enum ItemChange<R> {
    Insertion {
        item: Item<R>,
        at: usize,
    },
    Deletion {
        item: Item<R>,
        from: usize,
    },
    Move {
        item: Item<R>,
        from: usize,
        to: usize,
        changed_columns: IndexMap<String, Value>,
    },
    Update {
        item: Item<R>,
        at: usize,
        changed_columns: IndexMap<String, Value>,
    },
}

impl<R> ItemChange<R> {
    pub fn item(&self) -> &Item<R> {
        match self {
            ItemChange::Insertion { item, .. }
            | ItemChange::Deletion { item, .. }
            | ItemChange::Move { item, .. }
            | ItemChange::Update { item, .. } => item,
        }
    }

    /// True for `Move`/`Update`, i.e. entries standardize() produced by
    /// merging an insertion/deletion pair.
    pub fn is_merged(&self) -> bool {
        matches!(self, ItemChange::Move { .. } | ItemChange::Update { .. })
    }
}

/// A single-section index path: `(section, row)`. This crate only ever
/// produces `section == 0`: multi-section grouping is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    fn row(row: usize) -> Self {
        IndexPath { section: 0, row }
    }
}

/// The public-facing projection of [`ItemChange`], omitting the `Item`
/// handle in favor of the decoded record.
pub enum FetchedRecordsEvent<R> {
    Insertion {
        record: R,
        index: IndexPath,
    },
    Deletion {
        record: R,
        index: IndexPath,
    },
    Move {
        record: R,
        from: IndexPath,
        to: IndexPath,
        changed_columns: IndexMap<String, Value>,
    },
    Update {
        record: R,
        index: IndexPath,
        changed_columns: IndexMap<String, Value>,
    },
}

impl<R: Clone> ItemChange<R> {
    pub fn to_event(&self) -> FetchedRecordsEvent<R> {
        match self {
            ItemChange::Insertion { item, at } => FetchedRecordsEvent::Insertion {
                record: item.record().clone(),
                index: IndexPath::row(*at),
            },
            ItemChange::Deletion { item, from } => FetchedRecordsEvent::Deletion {
                record: item.record().clone(),
                index: IndexPath::row(*from),
            },
            ItemChange::Move { item, from, to, changed_columns } => FetchedRecordsEvent::Move {
                record: item.record().clone(),
                from: IndexPath::row(*from),
                to: IndexPath::row(*to),
                changed_columns: changed_columns.clone(),
            },
            ItemChange::Update { item, at, changed_columns } => FetchedRecordsEvent::Update {
                record: item.record().clone(),
                index: IndexPath::row(*at),
                changed_columns: changed_columns.clone(),
            },
        }
    }
}
