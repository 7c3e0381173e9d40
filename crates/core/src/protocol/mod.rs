//! Wire formats for the two control protocols.
//!
//! - [`amp`]: the lightweight protocol clients use to start and stop
//!   proxied sessions (one text message per UDP datagram).
//! - [`rtsp`]: the client half of RTSP used to drive the backend server
//!   over TCP.
//!
//! Both share the HTTP-like framing of a start line followed by
//! `Name: Value` headers and a blank line.

pub mod amp;
pub mod rtsp;

pub use amp::{Code, Packet};
