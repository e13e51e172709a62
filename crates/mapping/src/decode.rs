// SPDX-License-Identifier: MPL-2.0

//! The binary mapping file format.
//!
//! A mapping file is a sequence of records, read until the end of the file:
//!
//! ```text
//! +-----+-----------------+-----------------+--------------+------+
//! |  n  | lower (n/2 B)   | upper (n/2 B)   | market bytes | 0x00 |
//! +-----+-----------------+-----------------+--------------+------+
//! ```
//!
//! `n` is the total number of address bytes and may be at most [`MAX_ADDRESS_LEN`]. Each bound is
//! right-justified into a 16-byte big-endian address. When `n` is 8, the record describes an IPv4
//! range and both bounds are stored as IPv4-mapped IPv6 addresses. The market name runs until a NUL
//! byte or the end of the file, whichever comes first; the NUL is not part of the name. Market
//! names are kept as raw bytes and need not be UTF-8.
//!
//! When `n` is odd, the upper bound still occupies the last `n/2` bytes of its address. The bytes
//! past that width wrap around and overwrite the start of the bound, so with `n == 3` the upper
//! bound is just the third byte. A record with `n == 1` has empty bounds and its single address
//! byte is ignored.
//!
//! Decoding is all-or-nothing. Any bad record fails the whole file, and no partially built table
//! escapes this module.

use std::{fmt, fs, net::Ipv6Addr, path::Path};

use error_stack::{IntoReport as _, Result, ResultExt as _};
use memmap2::Mmap;

use crate::{IpRange, Table};

/// The largest address length byte a record may carry.
pub const MAX_ADDRESS_LEN: u8 = 32;
/// The address length byte of an IPv4 record.
const IPV4_ADDRESS_LEN: u8 = 8;
/// The width, in bytes, of a normalized address.
const ADDRESS_WIDTH: usize = 16;

/// An error returned by [`decode`].
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The record's address length byte exceeds [`MAX_ADDRESS_LEN`].
    #[error(
        "record at offset {offset} has an address length of {len} (at most {} allowed)",
        MAX_ADDRESS_LEN,
    )]
    MalformedRecord { offset: usize, len: u8 },
    /// The file ended before all of the record's address bytes were read.
    #[error("record at offset {offset} is truncated; expected {len} address bytes")]
    TruncatedRecord { offset: usize, len: u8 },
}

/// Decodes a complete mapping file that is already in memory.
///
/// Records appear in the returned [`Table`] in file order. They are not sorted or validated beyond
/// what the format itself requires.
pub fn decode(bytes: &[u8]) -> Result<Table, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut progress = Progress::new(bytes.len());
    let mut ranges = Vec::new();

    while let Some(range) = decode_record(&mut reader)? {
        ranges.push(range);
        progress.update(reader.offset());
    }

    Ok(Table::new(ranges))
}

fn decode_record(reader: &mut Reader<'_>) -> Result<Option<IpRange>, DecodeError> {
    let offset = reader.offset();
    let Some(len) = reader.next_byte() else {
        return Ok(None);
    };
    if len > MAX_ADDRESS_LEN {
        return Err(error_stack::report!(DecodeError::MalformedRecord { offset, len }));
    }

    let address = reader
        .take(usize::from(len))
        .ok_or_else(|| error_stack::report!(DecodeError::TruncatedRecord { offset, len }))?;
    let width = usize::from(len / 2);
    let (lower, upper) = address.split_at(width);
    let is_ipv4 = len == IPV4_ADDRESS_LEN;

    let market = reader.take_until_nul();

    Ok(Some(IpRange {
        lower: address_from_bytes(lower, width, is_ipv4),
        upper: address_from_bytes(upper, width, is_ipv4),
        market: market.to_vec(),
    }))
}

/// Right-justifies `bytes` into the last `width` bytes of a 16-byte address.
///
/// Bytes beyond `width` wrap around, each later chunk overwriting the one before it.
fn address_from_bytes(bytes: &[u8], width: usize, is_ipv4: bool) -> Ipv6Addr {
    let mut octets = [0; ADDRESS_WIDTH];
    if is_ipv4 {
        // The IPv4-mapped marker.
        octets[10] = 0xff;
        octets[11] = 0xff;
    }
    if width > 0 {
        let field = &mut octets[ADDRESS_WIDTH - width..];
        for chunk in bytes.chunks(width) {
            field[..chunk.len()].copy_from_slice(chunk);
        }
    }

    Ipv6Addr::from(octets)
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = *self.remaining().first()?;
        self.offset += 1;

        Some(byte)
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let taken = self.remaining().get(..count)?;
        self.offset += count;

        Some(taken)
    }

    /// Consumes bytes up to and including the next NUL, returning them without the NUL.
    ///
    /// If there is no NUL, everything that remains is consumed.
    fn take_until_nul(&mut self) -> &'a [u8] {
        let remaining = self.remaining();
        match remaining.iter().position(|&byte| byte == 0) {
            Some(end) => {
                self.offset += end + 1;

                &remaining[..end]
            }
            None => {
                self.offset = self.bytes.len();

                remaining
            }
        }
    }
}

/// Reports decoding progress in tenths of a percent, only when the displayed value changes.
struct Progress {
    total: usize,
    last_permille: Option<u64>,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self { total, last_permille: None }
    }

    fn update(&mut self, consumed: usize) {
        if self.total == 0 {
            return;
        }

        let permille = (consumed as u64).saturating_mul(1000) / self.total as u64;
        if self.last_permille != Some(permille) {
            self.last_permille = Some(permille);
            tracing::trace!("Loading mapping: {}.{}%", permille / 10, permille % 10);
        }
    }
}

/// An error returned by [`open_file`].
#[derive(thiserror::Error, Debug)]
pub enum OpenFileError {
    /// The call to [`fs::File::open`] failed.
    #[error("std::fs::File::open() failed")]
    Open,
    /// The call to [`fs::File::metadata`] failed.
    #[error("std::fs::File::metadata() failed")]
    Metadata,
    /// The call to [`Mmap::map`] failed.
    #[error("memmap2::Mmap::map() failed")]
    Map,
    /// The call to [`decode`] failed.
    #[error("failed to decode mapping file")]
    Decode,
}

/// Decodes the mapping file at the given path.
///
/// The file is memory-mapped for the duration of the decode. On success, the table is checked
/// with [`Table::check_order`] and any violation is logged; it does not fail the load.
#[tracing::instrument]
pub fn open_file(path: impl AsRef<Path> + fmt::Debug) -> Result<Table, OpenFileError> {
    tracing::info!("Loading mapping");

    let file = fs::File::open(path.as_ref())
        .into_report()
        .change_context(OpenFileError::Open)?;
    let len = file.metadata().into_report().change_context(OpenFileError::Metadata)?.len();

    let table = if len == 0 {
        // Zero-length mappings are not portable, and there is nothing to decode anyway.
        Table::default()
    } else {
        // SAFETY: the map is private to this function and dropped before it returns. Mapping
        // files are replaced by writing a new file and renaming it over the old one, so the
        // mapped pages are not modified while we read them.
        let mmap = unsafe { Mmap::map(&file) }
            .into_report()
            .change_context(OpenFileError::Map)?;

        decode(&mmap).change_context(OpenFileError::Decode)?
    };

    if let Err(violation) = table.check_order() {
        tracing::warn!(
            "mapping is not sorted and disjoint; lookups may miss: {violation} ({})",
            table.ranges()[violation.index()],
        );
    }
    tracing::info!("Loaded mapping with {} records", table.len());

    Ok(table)
}
