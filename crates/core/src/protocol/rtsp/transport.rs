/// RTP/RTCP transport parameters from the RTSP `Transport` header (RFC 2326 §12.39).
///
/// The proxy asks the backend to deliver to its own relay ports:
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=20000-20001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=20000-20001;server_port=5000-5001
/// ```
///
/// Only `RTP/AVP;unicast` over UDP is used; interleaved TCP and multicast
/// are never requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Port that receives RTP.
    pub client_rtp_port: u16,
    /// Port that receives RTCP (normally `client_rtp_port + 1`).
    pub client_rtcp_port: u16,
    /// Server's sending ports, present in replies only.
    pub server_ports: Option<(u16, u16)>,
}

impl TransportHeader {
    /// Request for delivery to `rtp_port` and `rtp_port + 1`.
    pub fn unicast(rtp_port: u16) -> Self {
        TransportHeader {
            client_rtp_port: rtp_port,
            client_rtcp_port: rtp_port.wrapping_add(1),
            server_ports: None,
        }
    }

    /// Format as a header value.
    pub fn to_header_value(&self) -> String {
        let mut value = format!(
            "RTP/AVP;unicast;client_port={}-{}",
            self.client_rtp_port, self.client_rtcp_port
        );
        if let Some((rtp, rtcp)) = self.server_ports {
            value.push_str(&format!(";server_port={}-{}", rtp, rtcp));
        }
        value
    }

    /// Parse the `Transport` header value.
    ///
    /// Looks for `client_port=RTP-RTCP` (required) and `server_port=RTP-RTCP`
    /// (optional) among semicolon-separated parameters.
    ///
    /// ## Examples
    ///
    /// ```
    /// use amp_proxy::protocol::rtsp::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.server_ports, Some((5000, 5001)));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut client = None;
        let mut server = None;

        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                client = parse_port_pair(ports);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                server = parse_port_pair(ports);
            }
        }

        let (client_rtp_port, client_rtcp_port) = client?;
        Some(TransportHeader {
            client_rtp_port,
            client_rtcp_port,
            server_ports: server,
        })
    }
}

fn parse_port_pair(ports: &str) -> Option<(u16, u16)> {
    let port_parts: Vec<&str> = ports.split('-').collect();
    if port_parts.len() != 2 {
        return None;
    }
    let rtp_port: u16 = port_parts[0].trim().parse().ok()?;
    let rtcp_port: u16 = port_parts[1].trim().parse().ok()?;
    Some((rtp_port, rtcp_port))
}
