// SPDX-License-Identifier: MPL-2.0

//! IP range to market mapping.
//!
//! A mapping file is decoded by [`open_file`] (or [`decode`] for bytes already in memory) into a
//! [`Table`] of [`IpRange`]s. The active table lives in a [`Store`], which serves lookups and
//! lets a reload install a replacement table without readers ever observing a partial one.

pub use decode::{decode, open_file, DecodeError, OpenFileError, MAX_ADDRESS_LEN};
pub use lookup::{normalize, DEFAULT_MARKET};
pub use store::Store;
pub use table::{IpRange, OrderViolation, Table};

mod decode;
mod lookup;
mod store;
mod table;
