use std::net::IpAddr;

/// One CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: IpAddr,
    prefix: u8,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid subnet '{0}'")]
pub struct InvalidSubnet(pub String);

impl std::str::FromStr for Subnet {
    type Err = InvalidSubnet;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSubnet(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl Subnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

/// Allow-list of agent source addresses. An empty list admits everyone.
#[derive(Debug, Clone, Default)]
pub struct TrustedSubnets {
    subnets: Vec<Subnet>,
}

impl TrustedSubnets {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, InvalidSubnet> {
        let subnets = entries
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<Subnet>, _>>()?;
        Ok(Self { subnets })
    }

    pub fn is_enforced(&self) -> bool {
        !self.subnets.is_empty()
    }

    /// Whether a request from `source` may proceed. An unknown source is
    /// admitted only when the list is empty.
    pub fn admits(&self, source: Option<IpAddr>) -> bool {
        if !self.is_enforced() {
            return true;
        }
        source.is_some_and(|ip| self.subnets.iter().any(|net| net.contains(ip)))
    }
}
