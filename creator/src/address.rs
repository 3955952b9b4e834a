use std::net::Ipv4Addr;

use rand::Rng;

/// Either a single address or a CIDR block like `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpec {
    Fixed(Ipv4Addr),
    Range { network: Ipv4Addr, prefix: u8 },
}

impl AddressSpec {
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        match spec.split_once('/') {
            None => spec.parse().ok().map(AddressSpec::Fixed),
            Some((addr, prefix)) => {
                let addr: Ipv4Addr = addr.parse().ok()?;
                if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let prefix: u8 = prefix.parse().ok()?;
                if prefix > 32 {
                    return None;
                }
                let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
                Some(AddressSpec::Range { network, prefix })
            }
        }
    }

    /// Inclusive bounds of the addresses [`resolve`](Self::resolve) may return.
    pub fn host_bounds(&self) -> (Ipv4Addr, Ipv4Addr) {
        match *self {
            AddressSpec::Fixed(ip) => (ip, ip),
            AddressSpec::Range { network, prefix } => {
                let first = u32::from(network);
                let last = first | !mask(prefix);
                // /31 and /32 have no room for network and broadcast addresses
                if prefix <= 30 {
                    (Ipv4Addr::from(first + 1), Ipv4Addr::from(last - 1))
                } else {
                    (Ipv4Addr::from(first), Ipv4Addr::from(last))
                }
            }
        }
    }

    /// Draws a concrete address. Every call is independent of the previous ones.
    pub fn resolve(&self) -> Ipv4Addr {
        match self {
            AddressSpec::Fixed(ip) => *ip,
            AddressSpec::Range { .. } => {
                let (lo, hi) = self.host_bounds();
                Ipv4Addr::from(rand::rng().random_range(u32::from(lo)..=u32::from(hi)))
            }
        }
    }
}

fn mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

/// Returns `spec` itself for a fixed address, a random host for a CIDR range
/// and `None` for anything else, which callers treat as "no override".
pub fn get_valid_ipv4(spec: &str) -> Option<Ipv4Addr> {
    AddressSpec::parse(spec).map(|s| s.resolve())
}
