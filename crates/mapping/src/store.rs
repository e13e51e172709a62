// SPDX-License-Identifier: MPL-2.0

use std::{
    mem,
    net::Ipv6Addr,
    sync::{PoisonError, RwLock},
};

use crate::Table;

/// The active [`Table`], shared between lookups and reloads.
///
/// Lookups hold the read lock for the whole search, and [`Store::swap`] holds the write lock while
/// it replaces the table. A reader therefore sees either the old table or the new one, and the old
/// table is never dropped while a reader is still searching it.
#[derive(Debug, Default)]
pub struct Store {
    table: RwLock<Table>,
}

impl Store {
    pub fn new(table: Table) -> Self {
        Self { table: RwLock::new(table) }
    }

    /// Runs `f` against the current table.
    pub fn with_read_lock<R>(&self, f: impl FnOnce(&Table) -> R) -> R {
        // A panicking reader cannot leave the table half-replaced, so poisoning is ignored.
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);

        f(&table)
    }

    /// Installs `table`, making it visible to every lookup that starts after this returns.
    pub fn swap(&self, table: Table) {
        let old = {
            let mut current = self.table.write().unwrap_or_else(PoisonError::into_inner);

            mem::replace(&mut *current, table)
        };
        tracing::debug!("replaced mapping of {} records", old.len());
    }

    /// The market of `ip` in the current table.
    pub fn find_market(&self, ip: &Ipv6Addr) -> Vec<u8> {
        self.with_read_lock(|table| table.find_market(ip).to_vec())
    }

    pub fn len(&self) -> usize {
        self.with_read_lock(Table::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with_read_lock(Table::is_empty)
    }
}
