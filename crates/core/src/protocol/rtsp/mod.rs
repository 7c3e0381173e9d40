//! Client side of RTSP (RFC 2326), as spoken to the backend media server.
//!
//! The proxy drives each backend session through a fixed method sequence:
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | DESCRIBE | §10.2 | Check the media exists |
//! | SETUP | §10.4 | Point RTP/RTCP at the relay ports |
//! | PLAY | §10.5 | Start media delivery |
//! | GET_PARAMETER | §10.8 | Keepalive |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod request;
pub mod response;
pub mod transport;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use transport::TransportHeader;
