use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport protocol carrying a SIP (or RTP/RTCP) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transport::Udp => "UDP",
            Transport::Tcp => "TCP",
            Transport::Tls => "TLS",
            Transport::Ws => "WS",
            Transport::Wss => "WSS",
        };
        f.write_str(s)
    }
}

/// An (IP, port, transport) endpoint. Equality is bitwise on all three
/// fields; the value is immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    ip: IpAddr,
    port: u16,
    transport: Transport,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16, transport: Transport) -> Self {
        Address { ip, port, transport }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_bitwise_on_all_three_fields() {
        let a = Address::new("10.0.0.1".parse().unwrap(), 5060, Transport::Udp);
        let b = Address::new("10.0.0.1".parse().unwrap(), 5060, Transport::Udp);
        let c = Address::new("10.0.0.1".parse().unwrap(), 5061, Transport::Udp);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
