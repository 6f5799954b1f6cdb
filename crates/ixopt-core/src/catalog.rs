//! # Catalog Interface
//!
//! The catalog provides the optimizer with metadata about the table being
//! optimized: its columns with their storage types, its indexes (ordered key
//! parts, uniqueness, clustering) and table-level statistics.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and behind a trait object (`dyn Catalog`)
//! so that different storage engines can provide metadata. For testing and
//! development, the `InMemoryCatalog` provides a simple HashMap-based
//! implementation that can be populated programmatically.
//!
//! ## Clustered Primary Keys
//!
//! When the primary key is clustered, rows are stored in primary-key order and
//! every secondary index entry carries the primary-key columns as its row
//! reference. Two consequences matter to the optimizer:
//! - a secondary index "covers" the primary-key columns as well as its own;
//! - a range scan on the clustered key returns rows in row-id order, so it can
//!   always take part in row-id ordered intersections and unions.

use crate::error::{OptError, OptResult};
use crate::expr::TableRef;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Ordinal of an index within its table.
pub type IndexId = usize;

/// Storage type of a column. Determines how out-of-domain literals are
/// truncated and how wide the column is inside an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Integer of `bits` width (8, 16, 32 or 64).
    Int { bits: u8, unsigned: bool },
    Float,
    /// Variable-length string with a maximum length in characters.
    Varchar(u32),
    Date,
    Bool,
}

impl DataType {
    /// Bytes one value occupies in an index key, excluding the null flag.
    pub fn key_length(&self) -> usize {
        match self {
            DataType::Int { bits, .. } => (*bits as usize).div_ceil(8).max(1),
            DataType::Float => 8,
            // Two length bytes plus the (single-byte charset) payload.
            DataType::Varchar(len) => *len as usize + 2,
            DataType::Date => 3,
            DataType::Bool => 1,
        }
    }

    /// Inclusive value domain of integer columns.
    pub fn int_domain(&self) -> Option<(i64, i64)> {
        match *self {
            DataType::Int { bits, unsigned } => {
                let bits = bits.clamp(1, 64) as u32;
                if unsigned {
                    let max = if bits >= 63 { i64::MAX } else { (1i64 << bits) - 1 };
                    Some((0, max))
                } else if bits == 64 {
                    Some((i64::MIN, i64::MAX))
                } else {
                    Some((-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1))
                }
            }
            DataType::Bool => Some((0, 1)),
            _ => None,
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Bytes this column occupies in an index key, including the null flag.
    pub fn store_length(&self) -> usize {
        self.data_type.key_length() + usize::from(self.nullable)
    }
}

/// One key part of an index: a column ordinal plus its sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPartDef {
    pub column: usize,
    #[serde(default)]
    pub descending: bool,
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub parts: Vec<KeyPartDef>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[usize]) -> Self {
        Self {
            name: name.into(),
            parts: columns
                .iter()
                .map(|&column| KeyPartDef {
                    column,
                    descending: false,
                })
                .collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().map(|p| p.column)
    }
}

/// Everything the optimizer needs to know about one table's physical layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table: TableRef,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    /// Ordinal of the primary key in `indexes`, if the table has one.
    #[serde(default)]
    pub primary_key: Option<IndexId>,
    /// Whether rows are stored in primary-key order.
    #[serde(default)]
    pub clustered: bool,
}

impl TableInfo {
    pub fn new(table: TableRef, columns: Vec<ColumnDef>) -> Self {
        Self {
            table,
            columns,
            indexes: Vec::new(),
            primary_key: None,
            clustered: false,
        }
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Declare the primary key (must be unique) and whether it is clustered.
    pub fn with_primary_key(mut self, index: IndexDef, clustered: bool) -> Self {
        self.primary_key = Some(self.indexes.len());
        self.indexes.push(index.unique());
        self.clustered = clustered;
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn resolve_column(&self, name: &str) -> OptResult<usize> {
        self.column_index(name).ok_or_else(|| OptError::UnknownColumn {
            table: self.table.to_string(),
            column: name.to_string(),
        })
    }

    /// The clustered primary key, if rows are stored in its order.
    pub fn clustered_pk(&self) -> Option<IndexId> {
        if self.clustered {
            self.primary_key
        } else {
            None
        }
    }

    pub fn is_clustered_pk(&self, index: IndexId) -> bool {
        self.clustered_pk() == Some(index)
    }

    /// Columns whose values can be read from the index alone.
    pub fn index_columns(&self, index: IndexId) -> BTreeSet<usize> {
        let mut cols: BTreeSet<usize> = self.indexes[index].columns().collect();
        if let Some(pk) = self.clustered_pk() {
            cols.extend(self.indexes[pk].columns());
        }
        cols
    }

    /// Whether every column in `used` can be read from `index` alone.
    pub fn index_covers(&self, index: IndexId, used: &BTreeSet<usize>) -> bool {
        if self.is_clustered_pk(index) {
            // The clustered key holds the whole row, but reading it is a full row read.
            return false;
        }
        let cols = self.index_columns(index);
        used.iter().all(|c| cols.contains(c))
    }

    /// Bytes of one key of `index` (sum of its key parts' store lengths).
    pub fn key_length(&self, index: IndexId) -> usize {
        self.indexes[index]
            .columns()
            .map(|c| self.columns[c].store_length())
            .sum()
    }

    /// Bytes of a row identifier: the clustered key when there is one,
    /// otherwise a fixed-size row pointer.
    pub fn ref_length(&self) -> usize {
        match self.clustered_pk() {
            Some(pk) => self.key_length(pk),
            None => 8,
        }
    }

    /// Estimated bytes of one full row.
    pub fn row_length(&self) -> usize {
        self.columns.iter().map(|c| c.store_length()).sum::<usize>() + 8
    }
}

/// Catalog provides schema and statistics information.
pub trait Catalog: Send + Sync {
    fn get_table(&self, table: &TableRef) -> Option<TableInfo>;
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics>;
}

/// In-memory catalog for testing and development.
///
/// Tables are keyed by their fully-qualified name (`schema.table`). This catalog
/// is populated programmatically and does not persist across restarts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    /// Table layouts keyed by "schema.table".
    pub tables: HashMap<String, TableInfo>,
    /// Table-level statistics keyed by "schema.table".
    pub table_stats: HashMap<String, Statistics>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, info: TableInfo, stats: Statistics) {
        let key = info.table.to_string();
        self.tables.insert(key.clone(), info);
        self.table_stats.insert(key, stats);
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table(&self, table: &TableRef) -> Option<TableInfo> {
        self.tables.get(&table.to_string()).cloned()
    }

    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics> {
        self.table_stats.get(&table.to_string()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableInfo {
        TableInfo::new(
            TableRef::new("shop", "orders"),
            vec![
                ColumnDef::new("id", DataType::Int { bits: 64, unsigned: false }, false),
                ColumnDef::new("customer", DataType::Int { bits: 32, unsigned: false }, true),
                ColumnDef::new("status", DataType::Varchar(10), true),
            ],
        )
        .with_primary_key(IndexDef::new("PRIMARY", &[0]), true)
        .with_index(IndexDef::new("idx_customer", &[1]))
    }

    #[test]
    fn test_secondary_index_covers_clustered_key() {
        let t = orders();
        let used: BTreeSet<usize> = [0, 1].into_iter().collect();
        assert!(t.index_covers(1, &used));
        let used: BTreeSet<usize> = [1, 2].into_iter().collect();
        assert!(!t.index_covers(1, &used));
    }

    #[test]
    fn test_int_domains() {
        assert_eq!(
            DataType::Int { bits: 8, unsigned: false }.int_domain(),
            Some((-128, 127))
        );
        assert_eq!(
            DataType::Int { bits: 8, unsigned: true }.int_domain(),
            Some((0, 255))
        );
        assert_eq!(DataType::Float.int_domain(), None);
    }

    #[test]
    fn test_lengths() {
        let t = orders();
        assert_eq!(t.key_length(0), 8);
        assert_eq!(t.key_length(1), 5);
        assert_eq!(t.ref_length(), 8);
    }

    #[test]
    fn test_in_memory_catalog_lookup() {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(orders(), Statistics::new(100.0, 4096.0));
        let t = TableRef::new("shop", "orders");
        assert!(catalog.get_table(&t).is_some());
        assert_eq!(catalog.get_table_stats(&t).map(|s| s.row_count), Some(100.0));
        assert!(catalog.get_table(&TableRef::new("shop", "missing")).is_none());
    }
}
