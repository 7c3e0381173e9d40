use crate::error::{ProxyError, Result};

use super::{UdpRelay, join_host_port};

/// Open two relays on consecutive inbound ports `(p, p + 1)`.
///
/// Candidates start at `start_port` and advance by 2 after each failed
/// bind until `max_port` (inclusive) is passed. When the second relay of a
/// pair fails to bind, the first is closed before the next pair is tried,
/// so no socket outlives a failed attempt.
///
/// Resolution and connect errors are returned immediately: they depend on
/// the targets, not on the port being tried.
///
/// Per RFC 3550 §11, callers usually pass an even `start_port` so that RTP
/// lands on the even port and RTCP on the odd one.
pub fn allocate_pair(
    bind_host: &str,
    first_target: &str,
    second_target: &str,
    start_port: u16,
    max_port: u16,
) -> Result<(UdpRelay, UdpRelay)> {
    let mut port = u32::from(start_port);
    let last = u32::from(max_port).min(u32::from(u16::MAX) - 1);

    while port <= last {
        let first_addr = join_host_port(bind_host, port as u16);
        match UdpRelay::open(&first_addr, first_target) {
            Ok(first) => {
                let second_addr = join_host_port(bind_host, port as u16 + 1);
                match UdpRelay::open(&second_addr, second_target) {
                    Ok(second) => {
                        tracing::debug!(
                            rtp_port = port,
                            rtcp_port = port + 1,
                            "allocated relay pair"
                        );
                        return Ok((first, second));
                    }
                    Err(e @ (ProxyError::Resolve { .. } | ProxyError::Connect { .. })) => return Err(e),
                    Err(e) => {
                        tracing::trace!(port = port + 1, error = %e, "second relay port unavailable");
                        first.close();
                    }
                }
            }
            Err(e @ (ProxyError::Resolve { .. } | ProxyError::Connect { .. })) => return Err(e),
            Err(e) => {
                tracing::trace!(port, error = %e, "first relay port unavailable");
            }
        }
        port += 2;
    }

    tracing::warn!(start_port, max_port, "relay port range exhausted");
    Err(ProxyError::PortRangeExhausted {
        start: start_port,
        end: max_port,
    })
}
