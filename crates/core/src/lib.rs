pub mod backend;
pub mod error;
pub mod gate;
pub mod load;
pub mod observe;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;

pub use backend::{Backend, Connector, RtspClient, RtspConnector};
pub use error::{ProxyError, Result};
pub use load::LoadStats;
pub use proxy::{AmpProxy, ClientKey, ProxyConfig, ProxyServer, ProxySession};
pub use registry::{Session, SessionRegistry};
pub use relay::UdpRelay;
pub use server::ControlServer;
