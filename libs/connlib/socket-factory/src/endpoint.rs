use std::net::{IpAddr, SocketAddr};

/// The addressing state of a single remote peer.
///
/// `dst` is where the peer's datagrams come from and where we send to.
/// `src` is the local address the peer last reached us on; replying from the same address keeps
/// asymmetric routing setups working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    dst: SocketAddr,
    src: Option<IpAddr>,
}

impl Endpoint {
    pub fn new(dst: SocketAddr) -> Self {
        Self { dst, src: None }
    }

    pub fn with_src(dst: SocketAddr, src: IpAddr) -> Self {
        Self {
            dst,
            src: Some(src),
        }
    }

    /// Forgets the cached source address; the destination is kept.
    pub fn clear_src(&mut self) {
        self.src = None;
    }

    /// The cached source address, empty if there is none.
    pub fn src_to_string(&self) -> String {
        self.src.map(|ip| ip.to_string()).unwrap_or_default()
    }

    pub fn dst_to_string(&self) -> String {
        self.dst.to_string()
    }

    /// The destination IP's octets followed by the port in little-endian byte order.
    pub fn dst_to_bytes(&self) -> Vec<u8> {
        let mut bytes = match self.dst.ip() {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        };
        bytes.extend_from_slice(&self.dst.port().to_le_bytes());

        bytes
    }

    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    pub fn dst_ip(&self) -> IpAddr {
        self.dst.ip()
    }

    pub fn src_ip(&self) -> Option<IpAddr> {
        self.src
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Missing port in address `{0}`")]
    MissingPort(String),
    #[error("Failed to parse IP address: {0}")]
    NotAnIpAddress(String),
    #[error("Invalid port in address `{0}`")]
    InvalidPort(String),
    #[error("Malformed address `{0}`")]
    Malformed(String),
}

/// Parses `ip:port` or `[ipv6]:port`.
///
/// Host names are rejected, we never resolve anything here.
pub fn parse_endpoint(addr: &str) -> Result<SocketAddr, EndpointError> {
    let (host, port) = split_host_port(addr)?;

    let ip = host
        .parse::<IpAddr>()
        .map_err(|_| EndpointError::NotAnIpAddress(host.to_owned()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(addr.to_owned()))?;

    Ok(SocketAddr::new(ip, port))
}

fn split_host_port(addr: &str) -> Result<(&str, &str), EndpointError> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| EndpointError::Malformed(addr.to_owned()))?;

        if rest.is_empty() {
            return Err(EndpointError::MissingPort(addr.to_owned()));
        }
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| EndpointError::Malformed(addr.to_owned()))?;

        return Ok((host, port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| EndpointError::MissingPort(addr.to_owned()))?;

    if host.contains(':') {
        return Err(EndpointError::Malformed(addr.to_owned())); // Unbracketed IPv6 address.
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use test_case::test_case;

    #[test_case("127.0.0.1:51820", "127.0.0.1:51820" ; "ipv4")]
    #[test_case("[::1]:51820", "[::1]:51820" ; "ipv6")]
    #[test_case("[fd00::2]:0", "[fd00::2]:0" ; "ipv6 port zero")]
    fn parses_literal_addresses(input: &str, expected: &str) {
        assert_eq!(
            parse_endpoint(input).unwrap(),
            expected.parse::<SocketAddr>().unwrap()
        );
    }

    #[test_case("vpn.example.com:51820", EndpointError::NotAnIpAddress("vpn.example.com".to_owned()) ; "host name")]
    #[test_case("127.0.0.1", EndpointError::MissingPort("127.0.0.1".to_owned()) ; "no port")]
    #[test_case("[::1]", EndpointError::MissingPort("[::1]".to_owned()) ; "bracketed without port")]
    #[test_case("127.0.0.1:wireguard", EndpointError::InvalidPort("127.0.0.1:wireguard".to_owned()) ; "service name")]
    #[test_case("127.0.0.1:70000", EndpointError::InvalidPort("127.0.0.1:70000".to_owned()) ; "port out of range")]
    #[test_case("::1:51820", EndpointError::Malformed("::1:51820".to_owned()) ; "unbracketed ipv6")]
    #[test_case("[::1:51820", EndpointError::Malformed("[::1:51820".to_owned()) ; "unterminated bracket")]
    fn rejects_invalid_addresses(input: &str, expected: EndpointError) {
        assert_eq!(parse_endpoint(input).unwrap_err(), expected);
    }

    #[test]
    fn clearing_source_keeps_destination() {
        let dst = SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 51820));
        let mut endpoint = Endpoint::with_src(dst, Ipv4Addr::new(10, 0, 0, 1).into());

        endpoint.clear_src();

        assert_eq!(endpoint.src_ip(), None);
        assert_eq!(endpoint.src_to_string(), "");
        assert_eq!(endpoint.dst(), dst);
    }

    #[test]
    fn formats_addresses() {
        let endpoint = Endpoint::with_src(
            SocketAddr::from((Ipv6Addr::LOCALHOST, 443)),
            Ipv6Addr::LOCALHOST.into(),
        );

        assert_eq!(endpoint.dst_to_string(), "[::1]:443");
        assert_eq!(endpoint.src_to_string(), "::1");
    }

    #[test]
    fn ipv4_destination_bytes_end_with_little_endian_port() {
        let endpoint = Endpoint::new(SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 51820)));

        assert_eq!(endpoint.dst_to_bytes(), [192, 0, 2, 1, 0x6c, 0xca]);
    }

    #[test]
    fn ipv6_destination_bytes_have_full_address() {
        let endpoint = Endpoint::new(SocketAddr::from((Ipv6Addr::LOCALHOST, 1)));

        let bytes = endpoint.dst_to_bytes();

        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[15], 1);
        assert_eq!(bytes[16..], [1, 0]);
    }
}
