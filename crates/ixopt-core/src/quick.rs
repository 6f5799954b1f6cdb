//! # Row Retrieval Descriptions
//!
//! A [`QuickSelect`] is the executor-facing form of a winning plan: key
//! ranges per index and the way the per-index row streams are combined.
//! [`QuickSelect::row_ids`] runs the description against an [`IndexSource`]
//! and returns the identifiers of the rows the plan retrieves, sorted and
//! without duplicates. Callers still evaluate the full predicate on those rows.

use crate::catalog::{IndexId, TableInfo};
use crate::expr::ScalarValue;
use crate::range::seq::prefix_cmp;
use crate::range::{Interval, KeyRange};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

pub type RowId = u64;

/// Read access to the entries of a table's indexes.
pub trait IndexSource {
    /// All entries of `index` as `(key, row id)`, in index order and, for
    /// equal keys, in row id order.
    fn index_entries(&self, index: IndexId) -> Vec<(Vec<ScalarValue>, RowId)>;

    /// Row ids of the entries of `index` inside `range`.
    fn scan_range(&self, index: IndexId, range: &KeyRange, descending: &[bool]) -> Vec<RowId> {
        self.index_entries(index)
            .into_iter()
            .filter(|(key, _)| range.contains(key, descending))
            .map(|(_, id)| id)
            .collect()
    }
}

/// MIN/MAX part of a loose index scan.
#[derive(Debug, Clone, Serialize)]
pub struct MinMaxSpec {
    /// Admissible values of the MIN/MAX argument; empty means unrestricted.
    pub ranges: Vec<Interval>,
    pub have_min: bool,
    pub have_max: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuickSelect {
    Range {
        index: IndexId,
        index_name: String,
        ranges: Vec<KeyRange>,
        descending: Vec<bool>,
    },
    RorIntersect {
        children: Vec<QuickSelect>,
        cpk: Option<Box<QuickSelect>>,
    },
    RorUnion {
        children: Vec<QuickSelect>,
    },
    IndexIntersect {
        children: Vec<QuickSelect>,
    },
    IndexMerge {
        children: Vec<QuickSelect>,
        cpk: Option<Box<QuickSelect>>,
    },
    GroupMinMax {
        index: IndexId,
        group_prefix_len: usize,
        key_infix: Vec<ScalarValue>,
        min_max: Option<MinMaxSpec>,
        prefix_ranges: Option<Vec<KeyRange>>,
        descending: Vec<bool>,
    },
}

impl QuickSelect {
    pub fn range(table: &TableInfo, index: IndexId, ranges: Vec<KeyRange>) -> Self {
        let def = &table.indexes[index];
        QuickSelect::Range {
            index,
            index_name: def.name.clone(),
            ranges,
            descending: def.parts.iter().map(|p| p.descending).collect(),
        }
    }

    /// Identifiers of the rows this plan retrieves, ascending.
    pub fn row_ids(&self, source: &dyn IndexSource) -> Vec<RowId> {
        self.row_set(source).into_iter().collect()
    }

    fn row_set(&self, source: &dyn IndexSource) -> BTreeSet<RowId> {
        match self {
            QuickSelect::Range {
                index,
                ranges,
                descending,
                ..
            } => ranges
                .iter()
                .flat_map(|r| source.scan_range(*index, r, descending))
                .collect(),
            QuickSelect::RorIntersect { children, cpk } => {
                let mut sets: Vec<BTreeSet<RowId>> =
                    children.iter().map(|c| c.row_set(source)).collect();
                sets.extend(cpk.iter().map(|c| c.row_set(source)));
                intersect_all(sets)
            }
            QuickSelect::IndexIntersect { children } => {
                intersect_all(children.iter().map(|c| c.row_set(source)).collect())
            }
            QuickSelect::RorUnion { children } => {
                children.iter().flat_map(|c| c.row_set(source)).collect()
            }
            QuickSelect::IndexMerge { children, cpk } => children
                .iter()
                .chain(cpk.iter().map(|b| b.as_ref()))
                .flat_map(|c| c.row_set(source))
                .collect(),
            QuickSelect::GroupMinMax { index, .. } => {
                self.loose_scan(source.index_entries(*index))
            }
        }
    }

    fn loose_scan(&self, entries: Vec<(Vec<ScalarValue>, RowId)>) -> BTreeSet<RowId> {
        let QuickSelect::GroupMinMax {
            group_prefix_len,
            key_infix,
            min_max,
            prefix_ranges,
            descending,
            ..
        } = self
        else {
            return BTreeSet::new();
        };
        let infix_end = group_prefix_len + key_infix.len();
        let qualifies = |key: &[ScalarValue]| {
            if let Some(ranges) = prefix_ranges {
                let prefix = &key[..(*group_prefix_len).min(key.len())];
                if !ranges.iter().any(|r| r.contains(prefix, descending)) {
                    return false;
                }
            }
            let infix_ok = key_infix
                .iter()
                .enumerate()
                .all(|(i, v)| key.get(group_prefix_len + i).is_some_and(|k| k.key_cmp(v) == Ordering::Equal));
            let arg_ok = match min_max {
                Some(spec) if !spec.ranges.is_empty() => key
                    .get(infix_end)
                    .is_some_and(|v| spec.ranges.iter().any(|iv| iv.contains(v))),
                _ => true,
            };
            infix_ok && arg_ok
        };

        let mut out = BTreeSet::new();
        let mut group: Vec<&(Vec<ScalarValue>, RowId)> = Vec::new();
        let flush = |group: &mut Vec<&(Vec<ScalarValue>, RowId)>, out: &mut BTreeSet<RowId>| {
            if group.is_empty() {
                return;
            }
            match min_max {
                None => out.extend(group.first().map(|(_, id)| *id)),
                Some(spec) => {
                    // MIN and MAX ignore NULL arguments unless the group has nothing else.
                    let non_null: Vec<_> = group
                        .iter()
                        .filter(|(k, _)| k.get(infix_end).is_some_and(|v| !v.is_null()))
                        .collect();
                    let candidates = if non_null.is_empty() {
                        group.iter().collect()
                    } else {
                        non_null
                    };
                    let desc = descending.get(infix_end).copied().unwrap_or(false);
                    let (low, high) = (candidates.first(), candidates.last());
                    let (min_entry, max_entry) = if desc { (high, low) } else { (low, high) };
                    if spec.have_min {
                        out.extend(min_entry.map(|(_, id)| *id));
                    }
                    if spec.have_max {
                        out.extend(max_entry.map(|(_, id)| *id));
                    }
                }
            }
            group.clear();
        };
        for entry in &entries {
            if !qualifies(&entry.0) {
                continue;
            }
            let same_group = group.first().is_some_and(|first| {
                let n = *group_prefix_len;
                prefix_cmp(&entry.0[..n.min(entry.0.len())], &first.0[..n.min(first.0.len())], descending)
                    == Ordering::Equal
            });
            if !same_group {
                flush(&mut group, &mut out);
            }
            group.push(entry);
        }
        flush(&mut group, &mut out);
        out
    }
}

fn intersect_all(mut sets: Vec<BTreeSet<RowId>>) -> BTreeSet<RowId> {
    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let Some(mut acc) = iter.next() else {
        return BTreeSet::new();
    };
    for s in iter {
        acc.retain(|id| s.contains(id));
    }
    acc
}

/// In-memory table whose row ids are row positions.
#[derive(Debug, Clone)]
pub struct MemTable {
    pub table: TableInfo,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl MemTable {
    pub fn new(table: TableInfo, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self { table, rows }
    }
}

impl IndexSource for MemTable {
    fn index_entries(&self, index: IndexId) -> Vec<(Vec<ScalarValue>, RowId)> {
        let def = &self.table.indexes[index];
        let descending: Vec<bool> = def.parts.iter().map(|p| p.descending).collect();
        let mut entries: Vec<(Vec<ScalarValue>, RowId)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(id, row)| {
                let key = def
                    .parts
                    .iter()
                    .map(|p| row.get(p.column).cloned().unwrap_or(ScalarValue::Null))
                    .collect();
                (key, id as RowId)
            })
            .collect();
        entries.sort_by(|(ka, ia), (kb, ib)| prefix_cmp(ka, kb, &descending).then(ia.cmp(ib)));
        entries
    }
}
