use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::Ipv4Cidr;

/// Distance from the subnet base to the first pool address.
pub const POOL_OFFSET: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPool {
    pub name: String,
    pub protocol: String,
    pub addresses: Vec<String>,
}

/// MetalLB's legacy config-map layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetalLbConfig {
    #[serde(rename = "address-pools")]
    pub address_pools: Vec<AddressPool>,
}

/// Advances `ip` by `count`, carrying from the last octet upward.
/// Overflow past 255.255.255.255 wraps.
pub fn increment(ip: Ipv4Addr, count: u32) -> Ipv4Addr {
    let mut octets = ip.octets();
    let mut carry = u64::from(count);
    for octet in octets.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = u64::from(*octet) + (carry & 0xff);
        *octet = (sum & 0xff) as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    Ipv4Addr::from(octets)
}

/// Builds the single `default` layer2 pool of `count` addresses past the
/// fixed offset into `subnet`.
pub fn make_config(subnet: &Ipv4Cidr, count: u32) -> MetalLbConfig {
    let start = increment(subnet.base, POOL_OFFSET);
    let end = increment(start, count);
    MetalLbConfig {
        address_pools: vec![AddressPool {
            name: "default".to_string(),
            protocol: "layer2".to_string(),
            addresses: vec![format!("{} - {}", start, end)],
        }],
    }
}
