use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

/// Destination of a media packet. `Auto` carries whatever the OS reported
/// for an inbound datagram and lets the socket answer to either family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Undefined,
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Auto(SocketAddr),
}

impl Default for Address {
    fn default() -> Self {
        Self::Undefined
    }
}

impl Address {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4(v4),
            SocketAddr::V6(v6) => Self::V6(v6),
        }
    }

    /// Concrete socket address, if one is known.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Undefined => None,
            Self::V4(v4) => Some(SocketAddr::V4(*v4)),
            Self::V6(v6) => Some(SocketAddr::V6(*v6)),
            Self::Auto(addr) => Some(*addr),
        }
    }

    pub fn port(&self) -> u16 {
        self.socket_addr().map(|a| a.port()).unwrap_or(0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::V4(v4) => write!(f, "{v4}"),
            Self::V6(v6) => write!(f, "{v6}"),
            Self::Auto(addr) => write!(f, "{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_compares_tag_and_bytes() {
        let v4: SocketAddrV4 = "10.0.0.1:30000".parse().unwrap();
        let a = Address::V4(v4);
        let b = Address::V4(v4);
        let c = Address::Auto(SocketAddr::V4(v4));

        assert_eq!(a, b);
        assert_ne!(a, c); // same bytes, different tag
        assert_ne!(a, Address::Undefined);
    }

    #[test]
    fn port_of_undefined_is_zero() {
        assert_eq!(Address::Undefined.port(), 0);
    }
}
