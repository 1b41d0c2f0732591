//! Minimum-cost edit script between two ordered item sequences.
//!
//! Computes a Wagner-Fischer edit-distance matrix over row equality, then
//! post-processes ("standardizes") matched deletion/insertion pairs into
//! `Move` or `Update` events carrying a per-column old-value diff.

use crate::change::ItemChange;
use crate::identity::RecordIdentity;
use crate::item::Item;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Step {
    None,
    Match,
    Delete,
    Insert,
    Substitute,
}

enum RawOp {
    Delete(usize),
    Insert(usize),
}

/// Computes the edit script transforming `old` into `new`. Consumes both
/// sequences: every `Item` ends up owned by exactly one resulting
/// [`ItemChange`] (if it was inserted or deleted) or is dropped (if it was
/// retained unchanged).
#[tracing::instrument(skip_all, fields(old_len = old.len(), new_len = new.len()))]
pub fn diff<R>(old: Vec<Item<R>>, new: Vec<Item<R>>, identity: &RecordIdentity<R>) -> Vec<ItemChange<R>> {
    let m = old.len();
    let n = new.len();

    let mut cost = vec![vec![0u32; n + 1]; m + 1];
    let mut step = vec![vec![Step::None; n + 1]; m + 1];

    for (i, row) in cost.iter_mut().enumerate().skip(1) {
        row[0] = i as u32;
        step[i][0] = Step::Delete;
    }
    for j in 1..=n {
        cost[0][j] = j as u32;
        step[0][j] = Step::Insert;
    }

    for i in 1..=m {
        for j in 1..=n {
            if old[i - 1].row() == new[j - 1].row() {
                cost[i][j] = cost[i - 1][j];
                step[i][j] = Step::Match;
                continue;
            }
            let delete = cost[i - 1][j] + 1;
            let insert = cost[i][j - 1] + 1;
            let substitute = cost[i - 1][j - 1] + 2;
            let min = delete.min(insert).min(substitute);
            // Tie-break order: deletion, then insertion, then substitution.
            if delete == min {
                cost[i][j] = delete;
                step[i][j] = Step::Delete;
            } else if insert == min {
                cost[i][j] = insert;
                step[i][j] = Step::Insert;
            } else {
                cost[i][j] = substitute;
                step[i][j] = Step::Substitute;
            }
        }
    }

    let mut reverse_ops: Vec<RawOp> = Vec::new();
    let mut old_retained = vec![false; m];
    let mut new_retained = vec![false; n];
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        match step[i][j] {
            Step::Match => {
                old_retained[i - 1] = true;
                new_retained[j - 1] = true;
                i -= 1;
                j -= 1;
            }
            Step::Delete => {
                reverse_ops.push(RawOp::Delete(i - 1));
                i -= 1;
            }
            Step::Insert => {
                reverse_ops.push(RawOp::Insert(j - 1));
                j -= 1;
            }
            Step::Substitute => {
                // Pushed insertion-then-deletion here so that after the
                // final reverse below they read deletion-then-insertion,
                // matching the recurrence's "Deletion + Insertion" order.
                reverse_ops.push(RawOp::Insert(j - 1));
                reverse_ops.push(RawOp::Delete(i - 1));
                i -= 1;
                j -= 1;
            }
            Step::None => unreachable!("backtrace exhausted before reaching (0, 0)"),
        }
    }
    reverse_ops.reverse();

    // Prefix counts of retained (matched) positions, used by standardize()
    // to tell a same-relative-slot update from an actual reordering.
    let mut retained_before_old = vec![0usize; m + 1];
    for k in 0..m {
        retained_before_old[k + 1] = retained_before_old[k] + old_retained[k] as usize;
    }
    let mut retained_before_new = vec![0usize; n + 1];
    for k in 0..n {
        retained_before_new[k + 1] = retained_before_new[k] + new_retained[k] as usize;
    }

    let mut old_items: Vec<Option<Item<R>>> = old.into_iter().map(Some).collect();
    let mut new_items: Vec<Option<Item<R>>> = new.into_iter().map(Some).collect();

    let mut raw = Vec::with_capacity(reverse_ops.len());
    for op in reverse_ops {
        match op {
            RawOp::Delete(idx) => raw.push(ItemChange::Deletion {
                item: old_items[idx].take().expect("each old index consumed once"),
                from: idx,
            }),
            RawOp::Insert(idx) => raw.push(ItemChange::Insertion {
                item: new_items[idx].take().expect("each new index consumed once"),
                at: idx,
            }),
        }
    }

    tracing::debug!(raw_ops = raw.len(), "computed raw edit script");
    standardize(raw, identity, &retained_before_old, &retained_before_new)
}

/// Merges matched deletion/insertion pairs into `Move`/`Update` events.
///
/// Two raw entries merge when the identity predicate says their records
/// denote the same logical entity. Whether the merge becomes a `Move` or an
/// `Update` depends on each side's position *relative to the retained
/// backbone* (the rows that didn't change at all): if the deleted row sat
/// at the same offset, among retained rows, that the inserted row now sits
/// at among retained rows, nothing actually moved — it's an in-place
/// update. Comparing raw indices directly would be wrong whenever an
/// unrelated insertion/deletion elsewhere shifts the two sides' raw
/// positions apart without actually reordering this record.
fn standardize<R>(
    raw: Vec<ItemChange<R>>,
    identity: &RecordIdentity<R>,
    retained_before_old: &[usize],
    retained_before_new: &[usize],
) -> Vec<ItemChange<R>> {
    let mut merged: Vec<ItemChange<R>> = Vec::new();
    let mut updates: Vec<ItemChange<R>> = Vec::new();

    for c in raw {
        match c {
            ItemChange::Deletion { item, from } => {
                let found = merged.iter().position(|e| match e {
                    ItemChange::Insertion { item: ins, .. } => identity.same(ins.record(), item.record()),
                    _ => false,
                });
                match found {
                    Some(k) => {
                        let ItemChange::Insertion { item: new_item, at } = merged.remove(k) else {
                            unreachable!()
                        };
                        match item.row().changed_columns(new_item.row()) {
                            Some(changed_columns) => {
                                if retained_before_old[from] == retained_before_new[at] {
                                    updates.push(ItemChange::Update { item: new_item, at, changed_columns });
                                } else {
                                    merged.insert(k, ItemChange::Move { item: new_item, from, to: at, changed_columns });
                                }
                            }
                            // Schema mismatch: fall back to two distinct events.
                            None => {
                                merged.insert(k, ItemChange::Insertion { item: new_item, at });
                                merged.push(ItemChange::Deletion { item, from });
                            }
                        }
                    }
                    None => merged.push(ItemChange::Deletion { item, from }),
                }
            }
            ItemChange::Insertion { item, at } => {
                let found = merged.iter().position(|e| match e {
                    ItemChange::Deletion { item: del, .. } => identity.same(del.record(), item.record()),
                    _ => false,
                });
                match found {
                    Some(k) => {
                        let ItemChange::Deletion { item: old_item, from } = merged.remove(k) else {
                            unreachable!()
                        };
                        match old_item.row().changed_columns(item.row()) {
                            Some(changed_columns) => {
                                if retained_before_old[from] == retained_before_new[at] {
                                    updates.push(ItemChange::Update { item, at, changed_columns });
                                } else {
                                    merged.insert(k, ItemChange::Move { item, from, to: at, changed_columns });
                                }
                            }
                            None => {
                                merged.insert(k, ItemChange::Deletion { item: old_item, from });
                                merged.push(ItemChange::Insertion { item, at });
                            }
                        }
                    }
                    None => merged.push(ItemChange::Insertion { item, at }),
                }
            }
            _ => unreachable!("raw script only ever contains insertions and deletions"),
        }
    }

    merged.extend(updates);
    merged
}
