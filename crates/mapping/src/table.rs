// SPDX-License-Identifier: MPL-2.0

use std::{fmt, net::Ipv6Addr};

/// An inclusive range of addresses that belongs to one market.
///
/// IPv4 ranges are stored as IPv4-mapped IPv6 addresses, so a single [`Ipv6Addr`] ordering covers
/// both address families. That ordering is the same as comparing the 16 octets lexicographically.
///
/// The market name is the raw bytes from the mapping file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpRange {
    pub lower: Ipv6Addr,
    pub upper: Ipv6Addr,
    pub market: Vec<u8>,
}

impl IpRange {
    pub fn new(
        lower: impl Into<Ipv6Addr>,
        upper: impl Into<Ipv6Addr>,
        market: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            market: market.into(),
        }
    }

    pub fn contains(&self, ip: &Ipv6Addr) -> bool {
        (self.lower..=self.upper).contains(ip)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} => {:?}", self.lower, self.upper, String::from_utf8_lossy(&self.market))
    }
}

/// An ordered, immutable sequence of [`IpRange`]s.
///
/// Records are kept in the order they were decoded in. Lookups assume that order is ascending and
/// that no two ranges overlap; [`Table::check_order`] reports where that assumption breaks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    ranges: Vec<IpRange>,
}

impl From<Vec<IpRange>> for Table {
    fn from(ranges: Vec<IpRange>) -> Self {
        Self { ranges }
    }
}

impl FromIterator<IpRange> for Table {
    fn from_iter<I: IntoIterator<Item = IpRange>>(iter: I) -> Self {
        Self { ranges: iter.into_iter().collect() }
    }
}

impl Table {
    pub fn new(ranges: Vec<IpRange>) -> Self {
        Self::from(ranges)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }
}

/// The first place where a [`Table`] breaks the ordering that lookups depend on.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderViolation {
    #[error("record {index} has a lower bound above its upper bound")]
    Inverted { index: usize },
    #[error("record {index} does not start after the end of the previous record")]
    Unsorted { index: usize },
}

impl OrderViolation {
    pub fn index(&self) -> usize {
        match *self {
            Self::Inverted { index } | Self::Unsorted { index } => index,
        }
    }
}

impl Table {
    /// Verifies that every range is well-formed and strictly after its predecessor.
    pub fn check_order(&self) -> Result<(), OrderViolation> {
        for (index, range) in self.ranges.iter().enumerate() {
            if range.lower > range.upper {
                return Err(OrderViolation::Inverted { index });
            }
            if index > 0 && self.ranges[index - 1].upper >= range.lower {
                return Err(OrderViolation::Unsorted { index });
            }
        }

        Ok(())
    }
}
