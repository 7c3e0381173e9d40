//! Backend control sessions.
//!
//! For every proxied client the orchestrator opens one control session on
//! the backend streaming server, asking it to send media to the relay's
//! inbound RTP port. The session is an [`Observee`]: it reports when the
//! backend ends it (teardown, network failure) and can be told to stop.
//!
//! [`Connector`] is the seam between the orchestrator and the concrete
//! client; [`rtsp::RtspConnector`] is the production implementation.

pub mod rtsp;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::error::Result;
use crate::observe::Observee;

pub use rtsp::{RtspClient, RtspConnector};

/// A live control session on the backend server.
pub trait Backend: Observee + fmt::Display + 'static {
    /// Fully resolved media URL the session was opened for.
    fn media_url(&self) -> &str;

    /// Local port the backend was asked to deliver RTP to.
    fn rtp_port(&self) -> u16;
}

/// Opens backend control sessions.
pub trait Connector: Send + Sync + 'static {
    type Client: Backend;

    /// Start a session for `media_url`, delivering RTP to `rtp_port` (and
    /// RTCP to `rtp_port + 1`) on this host. When `log_file` is set, the
    /// control exchange is appended to it.
    fn start(
        &self,
        media_url: &Url,
        rtp_port: u16,
        log_file: Option<PathBuf>,
    ) -> Result<Arc<Self::Client>>;
}
