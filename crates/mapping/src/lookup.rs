// SPDX-License-Identifier: MPL-2.0

use std::{
    cmp::Ordering,
    net::{IpAddr, Ipv6Addr},
};

use crate::{IpRange, Table};

/// The market of any address that no range covers.
pub const DEFAULT_MARKET: &[u8] = b"default";

/// Converts an address into the 16-byte form used by [`Table`]s.
///
/// IPv4 addresses become IPv4-mapped IPv6 addresses.
pub fn normalize(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(ip) => ip.to_ipv6_mapped(),
        IpAddr::V6(ip) => ip,
    }
}

impl Table {
    /// Binary-searches for the range containing `ip`.
    ///
    /// The result is only meaningful if the table is sorted and its ranges are disjoint.
    pub fn find(&self, ip: &Ipv6Addr) -> Option<&IpRange> {
        let index = self
            .ranges()
            .binary_search_by(|range| {
                if range.upper < *ip {
                    Ordering::Less
                } else if range.lower > *ip {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .ok()?;

        self.ranges().get(index)
    }

    /// The market of the range containing `ip`, or [`DEFAULT_MARKET`].
    pub fn find_market(&self, ip: &Ipv6Addr) -> &[u8] {
        self.find(ip).map_or(DEFAULT_MARKET, |range| range.market.as_slice())
    }
}
