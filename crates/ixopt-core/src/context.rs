//! Per-table optimization context.
//!
//! Everything the range analysis needs for one table lives here: the node
//! arena, the resolved key parts of every index and the limits taken from
//! [`SearchConfig`]. A context is created for each optimization and dropped
//! with all of its structures at the end.

use crate::catalog::{IndexId, TableInfo};
use crate::error::{OptError, OptResult};
use crate::keymap::KeyMap;
use crate::range::{KeyPart, KeyRange, NodeId, RangeArena, MAX_KEY_PARTS};
use crate::search::SearchConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Key layout of one index.
#[derive(Debug, Clone)]
pub struct IndexKeyInfo {
    pub name: String,
    pub parts: Vec<KeyPart>,
    pub unique: bool,
}

impl IndexKeyInfo {
    pub fn descending(&self) -> Vec<bool> {
        self.parts.iter().map(|p| p.descending).collect()
    }
}

pub struct RangeContext {
    pub arena: RangeArena,
    pub indexes: Vec<IndexKeyInfo>,
    /// Disjunct cap for index-merge sets.
    pub max_merge_disjuncts: usize,
    /// Lists longer than this make `NOT IN` unsargable.
    pub max_not_in_list: usize,
    kill: Option<Arc<AtomicBool>>,
}

impl RangeContext {
    pub fn new(table: &TableInfo, config: &SearchConfig) -> OptResult<Self> {
        if table.indexes.len() > KeyMap::MAX_KEYS {
            return Err(OptError::TooManyIndexes {
                table: table.table.to_string(),
                count: table.indexes.len(),
                max: KeyMap::MAX_KEYS,
            });
        }
        let mut indexes = Vec::with_capacity(table.indexes.len());
        for index in &table.indexes {
            let mut parts = Vec::with_capacity(index.parts.len());
            for p in index.parts.iter().take(MAX_KEY_PARTS) {
                let column = table.columns.get(p.column).ok_or_else(|| OptError::UnknownColumn {
                    table: table.table.to_string(),
                    column: format!("#{}", p.column),
                })?;
                parts.push(KeyPart {
                    column: p.column,
                    data_type: column.data_type,
                    nullable: column.nullable,
                    descending: p.descending,
                });
            }
            indexes.push(IndexKeyInfo {
                name: index.name.clone(),
                parts,
                unique: index.unique,
            });
        }
        Ok(Self {
            arena: RangeArena::new(config.max_sel_args, config.max_sel_arg_weight),
            indexes,
            max_merge_disjuncts: config.max_merge_disjuncts,
            max_not_in_list: config.max_not_in_list,
            kill: None,
        })
    }

    pub fn with_kill_flag(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.kill = flag;
        self
    }

    /// Fails with [`OptError::Killed`] once the statement has been cancelled.
    pub fn check_killed(&self) -> OptResult<()> {
        match &self.kill {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(OptError::Killed),
            _ => Ok(()),
        }
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Key ranges of `node` on `index`, using at most `max_parts` key parts.
    pub fn key_ranges(&self, index: IndexId, node: NodeId, max_parts: usize) -> Vec<KeyRange> {
        let info = &self.indexes[index];
        self.arena
            .key_ranges(node, &info.parts, max_parts, info.unique)
    }

    /// Columns constrained by the graph `node` on `index`, in key part order.
    pub fn constrained_columns(&self, index: IndexId, node: NodeId) -> Vec<usize> {
        let n = self.arena.node(node);
        let parts = &self.indexes[index].parts;
        (n.part as usize..=n.max_part as usize)
            .filter_map(|p| parts.get(p).map(|kp| kp.column))
            .collect()
    }
}
