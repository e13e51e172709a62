// SPDX-License-Identifier: MPL-2.0

use std::net::{Ipv6Addr, SocketAddr};

/// The dual-stack wildcard address. IPv4 peers arrive as IPv4-mapped IPv6 addresses.
pub const PUBLIC_ADDR: Ipv6Addr = Ipv6Addr::UNSPECIFIED;

pub fn public_addr(port: u16) -> SocketAddr {
    (PUBLIC_ADDR, port).into()
}
