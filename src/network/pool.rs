use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Host offset inside the subnet where the load-balancer pool begins.
/// Lower addresses are left to the runtime for gateway and node containers.
pub const POOL_HOST_OFFSET: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("invalid IPv4 subnet {0:?}")]
    InvalidSubnet(String),

    #[error("pool of {count} addresses at offset {offset} does not fit in {subnet}")]
    OutOfRange {
        subnet: String,
        offset: u32,
        count: u32,
    },

    #[error("invalid address range {0:?}")]
    InvalidRange(String),
}

/// Parse `a.b.c.d/len` into the network address and prefix length
pub fn parse_ipv4_subnet(cidr: &str) -> Result<(Ipv4Addr, u8), PoolError> {
    let invalid = || PoolError::InvalidSubnet(cidr.to_string());

    let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

/// Contiguous IPv4 range handed to the load-balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressPool {
    /// Reserve the pool for `count` addresses in `subnet`.
    ///
    /// The pool runs from host offset [`POOL_HOST_OFFSET`] to
    /// `POOL_HOST_OFFSET + count`, both inclusive, and must stay below the
    /// broadcast address.
    pub fn allocate(subnet: &str, count: u32) -> Result<Self, PoolError> {
        Self::allocate_at(subnet, POOL_HOST_OFFSET, count)
    }

    pub fn allocate_at(subnet: &str, offset: u32, count: u32) -> Result<Self, PoolError> {
        let (network, prefix) = parse_ipv4_subnet(subnet)?;
        let size = 1u64 << (32 - u32::from(prefix));
        let last = u64::from(offset) + u64::from(count);

        // Broadcast sits at size - 1.
        if offset == 0 || last + 1 >= size {
            return Err(PoolError::OutOfRange {
                subnet: subnet.to_string(),
                offset,
                count,
            });
        }

        let base = u64::from(u32::from(network));
        Ok(Self {
            start: Ipv4Addr::from((base + u64::from(offset)) as u32),
            end: Ipv4Addr::from((base + last) as u32),
        })
    }

    /// Number of addresses covered by the range
    pub fn size(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// Parse the `start - end` form used in the MetalLB configuration
    pub fn parse_range(range: &str) -> Result<Self, PoolError> {
        let invalid = || PoolError::InvalidRange(range.to_string());

        let (start, end) = range.split_once('-').ok_or_else(invalid)?;
        let start = Ipv4Addr::from_str(start.trim()).map_err(|_| invalid())?;
        let end = Ipv4Addr::from_str(end.trim()).map_err(|_| invalid())?;
        if u32::from(start) > u32::from(end) {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}
