//! Network addresses

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

/// An immutable, resolved host address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    ip: IpAddr,
}

impl NetworkAddress {
    /// The loopback address (127.0.0.1)
    pub const LOCALHOST: NetworkAddress = NetworkAddress {
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
    };

    /// The "null" address (0.0.0.0), used for binding to every interface
    pub const ANY: NetworkAddress = NetworkAddress {
        ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    /// Wrap an IP address
    pub fn new(ip: IpAddr) -> Self {
        Self { ip }
    }

    /// Resolve a host string
    ///
    /// Accepts IP literals, `"localhost"`, `"any"`/`"null"` and DNS names.
    /// IPv4 results are preferred since listeners bind IPv4.
    pub fn resolve(host: &str) -> Option<Self> {
        match host {
            "localhost" => return Some(Self::LOCALHOST),
            "any" | "null" => return Some(Self::ANY),
            _ => {}
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(Self { ip });
        }

        let addrs: Vec<SocketAddr> = (host, 0).to_socket_addrs().ok()?.collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| Self { ip: a.ip() })
    }

    /// The IP address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Combine with a port
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(ip: IpAddr) -> Self {
        Self { ip }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}
