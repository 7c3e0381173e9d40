//! AMP to RTSP session proxy.
//!
//! For each `START_SESSION` request the proxy:
//!
//! 1. allocates a relay pair on consecutive local ports, forwarding to the
//!    client's `port` (RTP) and `port + 1` (RTCP),
//! 2. opens a backend RTSP session that delivers media to the relay's
//!    inbound RTP port,
//! 3. registers the composite [`ProxySession`] under the client's
//!    `host:port` key.
//!
//! The session ends on `STOP_SESSION`, at server shutdown, or when the
//! backend ends it on its own. All three paths run the same cleanup:
//! backend stopped first, then both relays closed, then the registry entry
//! dropped.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use url::Url;

use crate::backend::{Backend, Connector, RtspConnector};
use crate::error::{ProxyError, Result};
use crate::load::LoadStats;
use crate::observe::Observee;
use crate::protocol::amp::{StartSession, StopSession};
use crate::protocol::{Code, Packet};
use crate::registry::{Session, SessionRegistry};
use crate::relay::pair::allocate_pair;
use crate::relay::{UdpRelay, join_host_port, resolve};
use crate::server::{ControlServer, Handler};

/// Lowest inbound relay port tried.
pub const MIN_RELAY_PORT: u16 = 20000;
/// Highest inbound relay port tried (inclusive).
pub const MAX_RELAY_PORT: u16 = 50000;

/// Settings for one proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// AMP control socket address.
    pub listen_addr: String,
    /// Base RTSP URL; media names are resolved against it.
    pub rtsp_url: String,
    /// Local host the relays bind to. The backend sends media here.
    pub relay_host: String,
    pub min_port: u16,
    pub max_port: u16,
    /// Where backend control transcripts are written. `None` disables them.
    pub backend_log_dir: Option<PathBuf>,
}

impl ProxyConfig {
    pub fn new(
        listen_addr: impl Into<String>,
        rtsp_url: impl Into<String>,
        relay_host: impl Into<String>,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            rtsp_url: rtsp_url.into(),
            relay_host: relay_host.into(),
            min_port: MIN_RELAY_PORT,
            max_port: MAX_RELAY_PORT,
            backend_log_dir: None,
        }
    }
}

/// Identity of a proxied client: its media receiver as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(host: &str, port: u16) -> Self {
        Self(join_host_port(host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Hook<B> = Box<dyn Fn(&Arc<B>) + Send + Sync>;

/// Optional notifications about backend sessions.
struct Hooks<B> {
    started: RwLock<Option<Hook<B>>>,
    ended: RwLock<Option<Hook<B>>>,
}

impl<B> Default for Hooks<B> {
    fn default() -> Self {
        Self {
            started: RwLock::new(None),
            ended: RwLock::new(None),
        }
    }
}

impl<B> Hooks<B> {
    fn fire(hook: &RwLock<Option<Hook<B>>>, backend: &Arc<B>) {
        if let Some(hook) = hook.read().as_ref() {
            hook(backend);
        }
    }
}

/// One proxied client: a backend session plus its RTP and RTCP relays.
pub struct ProxySession<B: Backend> {
    client: ClientKey,
    port: u16,
    media_file: String,
    backend: Arc<B>,
    rtp: UdpRelay,
    rtcp: UdpRelay,
    hooks: Arc<Hooks<B>>,
    registry: SessionRegistry<ClientKey, ProxySession<B>>,
}

impl<B: Backend> ProxySession<B> {
    pub fn client(&self) -> &ClientKey {
        &self.client
    }

    /// Client's RTP receive port as requested.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn media_file(&self) -> &str {
        &self.media_file
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn rtp_relay(&self) -> &UdpRelay {
        &self.rtp
    }

    pub fn rtcp_relay(&self) -> &UdpRelay {
        &self.rtcp
    }

    /// Stop the backend and close both relays. Idempotent.
    fn release(&self) {
        self.backend.stop();
        self.rtp.close();
        self.rtcp.close();
        for relay in [&self.rtp, &self.rtcp] {
            if let Some(e) = relay.error() {
                tracing::debug!(client = %self.client, relay = %relay, error = %e, "relay had failed before cleanup");
            }
        }
    }
}

impl<B: Backend> Session for ProxySession<B> {
    fn start(&self) {
        Hooks::fire(&self.hooks.started, &self.backend);
    }

    fn observees(&self) -> Vec<Arc<dyn Observee>> {
        vec![self.backend.clone() as Arc<dyn Observee>]
    }

    fn cleanup(&self) -> Result<()> {
        self.release();
        Hooks::fire(&self.hooks.ended, &self.backend);
        self.registry.forget(&self.client, self);
        tracing::info!(
            client = %self.client,
            media = %self.media_file,
            rtp_bytes = self.rtp.stats().total(),
            rtcp_bytes = self.rtcp.stats().total(),
            "proxy session closed"
        );
        Ok(())
    }
}

/// The session orchestrator.
pub struct AmpProxy<C: Connector = RtspConnector> {
    connector: C,
    rtsp_url: Url,
    relay_host: String,
    min_port: u16,
    max_port: u16,
    log_dir: Option<PathBuf>,
    registry: SessionRegistry<ClientKey, ProxySession<C::Client>>,
    hooks: Arc<Hooks<C::Client>>,
}

impl<C: Connector> AmpProxy<C> {
    /// Validate the backend URL and resolve the relay host.
    pub fn new(config: &ProxyConfig, connector: C) -> Result<Self> {
        let rtsp_url = Url::parse(&config.rtsp_url).map_err(|e| ProxyError::InvalidUrl {
            url: config.rtsp_url.clone(),
            reason: e.to_string(),
        })?;
        if rtsp_url.scheme() != "rtsp" {
            return Err(ProxyError::InvalidUrl {
                url: config.rtsp_url.clone(),
                reason: format!("expected rtsp scheme, got {}", rtsp_url.scheme()),
            });
        }
        if rtsp_url.host_str().is_none() {
            return Err(ProxyError::InvalidUrl {
                url: config.rtsp_url.clone(),
                reason: "missing host".to_string(),
            });
        }

        let relay_host = resolve(&join_host_port(&config.relay_host, 0))?
            .ip()
            .to_string();

        Ok(Self {
            connector,
            rtsp_url,
            relay_host,
            min_port: config.min_port,
            max_port: config.max_port,
            log_dir: config.backend_log_dir.clone(),
            registry: SessionRegistry::new(),
            hooks: Arc::new(Hooks::default()),
        })
    }

    /// Allocate relays, start the backend session and register the result.
    ///
    /// Nothing stays allocated when this fails.
    pub fn start_session(&self, desc: &StartSession) -> Result<()> {
        let client = ClientKey::new(&desc.receiver_host, desc.port);
        if self.registry.lookup(&client).is_some() {
            return Err(ProxyError::SessionExists(client.to_string()));
        }

        let rtcp_port = desc.port.checked_add(1).ok_or_else(|| ProxyError::IllegalValue {
            code: Code::StartSession.to_string(),
            value: format!("port {} has no RTCP successor", desc.port),
        })?;
        let rtcp_client = join_host_port(&desc.receiver_host, rtcp_port);
        let media_url = media_url(&self.rtsp_url, &desc.media_file)?;

        let (rtp, rtcp) = allocate_pair(
            &self.relay_host,
            client.as_str(),
            &rtcp_client,
            self.min_port,
            self.max_port,
        )?;
        rtp.start();
        rtcp.start();
        let rtp_port = rtp.inbound_port();

        let log_file = self.log_dir.as_ref().map(|dir| {
            dir.join(format!(
                "amp-proxy-{}-{}.log",
                rtp_port,
                desc.media_file.replace('/', "_")
            ))
        });

        let backend = match self.connector.start(&media_url, rtp_port, log_file) {
            Ok(backend) => backend,
            Err(e) => {
                rtp.close();
                rtcp.close();
                tracing::warn!(client = %client, url = %media_url, error = %e, "backend session failed to start");
                return Err(ProxyError::BackendStart(Box::new(e)));
            }
        };

        let session = Arc::new(ProxySession {
            client: client.clone(),
            port: desc.port,
            media_file: desc.media_file.clone(),
            backend,
            rtp,
            rtcp,
            hooks: self.hooks.clone(),
            registry: self.registry.clone(),
        });

        if let Err(e) = self.registry.register(client.clone(), session.clone()) {
            session.release();
            return Err(e);
        }

        tracing::info!(client = %client, url = %media_url, rtp_port, "proxy session started");
        Ok(())
    }

    /// Stop and remove the session for the described client.
    pub fn stop_session(&self, desc: &StopSession) -> Result<()> {
        let client = ClientKey::new(&desc.receiver_host, desc.port);
        self.registry.stop_one(&client)
    }

    /// Clean up every active session. Returns how many were stopped.
    pub fn stop_server(&self) -> usize {
        let stopped = self.registry.stop_all();
        tracing::info!(stopped, "all proxy sessions stopped");
        stopped
    }

    /// Dispatch one AMP request. Unrecognized codes get no reply.
    pub fn handle(&self, packet: &Packet) -> Option<Packet> {
        match packet.code {
            Code::StartSession => Some(match StartSession::from_packet(packet) {
                Some(desc) => Packet::reply_check(&self.start_session(&desc)),
                None => illegal_value(packet),
            }),
            Code::StopSession => Some(match StopSession::from_packet(packet) {
                Some(desc) => Packet::reply_check(&self.stop_session(&desc)),
                None => illegal_value(packet),
            }),
            _ => {
                tracing::warn!(code = %packet.code, "received unexpected AMP code");
                None
            }
        }
    }

    /// Called with each backend session right after its proxy session is
    /// registered.
    pub fn on_backend_started(&self, hook: impl Fn(&Arc<C::Client>) + Send + Sync + 'static) {
        *self.hooks.started.write() = Some(Box::new(hook));
    }

    /// Called once per session during cleanup, after the backend has
    /// finished and the relays are closed.
    pub fn on_backend_ended(&self, hook: impl Fn(&Arc<C::Client>) + Send + Sync + 'static) {
        *self.hooks.ended.write() = Some(Box::new(hook));
    }

    pub fn session(&self, client: &ClientKey) -> Option<Arc<ProxySession<C::Client>>> {
        self.registry.lookup(client)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn clients(&self) -> Vec<ClientKey> {
        self.registry.keys()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

/// Resolve a media name as a path below `base`.
///
/// The name is split on `/` and appended segment by segment, so it can
/// never change the scheme, host or query of the backend URL. Characters
/// such as `?` and `#` are percent-encoded; `.` and `..` are dropped.
fn media_url(base: &Url, media_file: &str) -> Result<Url> {
    let segments: Vec<&str> = media_file
        .split('/')
        .filter(|s| !matches!(*s, "" | "." | ".."))
        .collect();
    let invalid = |reason: &str| ProxyError::InvalidUrl {
        url: media_file.to_string(),
        reason: reason.to_string(),
    };
    if segments.is_empty() {
        return Err(invalid("media name has no path"));
    }

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| invalid("backend URL cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn illegal_value(packet: &Packet) -> Packet {
    let err = ProxyError::IllegalValue {
        code: packet.code.to_string(),
        value: packet.describe(),
    };
    tracing::warn!(error = %err, "rejecting AMP request");
    Packet::error(&err.to_string())
}

/// An [`AmpProxy`] behind its own AMP control socket.
pub struct ProxyServer<C: Connector = RtspConnector> {
    server: ControlServer,
    proxy: Arc<AmpProxy<C>>,
    load: Mutex<Option<Arc<LoadStats>>>,
}

impl ProxyServer<RtspConnector> {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_connector(config, RtspConnector::default())
    }
}

impl<C: Connector> ProxyServer<C> {
    /// Build the proxy and bind its control socket. Requests are served
    /// after [`start`](Self::start).
    pub fn with_connector(config: ProxyConfig, connector: C) -> Result<Self> {
        let proxy = Arc::new(AmpProxy::new(&config, connector)?);
        let server = ControlServer::bind(&config.listen_addr)?;

        let mut handlers = HashMap::new();
        for code in [Code::StartSession, Code::StopSession] {
            let proxy = proxy.clone();
            let handler: Handler = Arc::new(move |packet: &Packet| proxy.handle(packet));
            handlers.insert(code, handler);
        }
        server.register_handlers(handlers)?;

        Ok(Self {
            server,
            proxy,
            load: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.server.start()
    }

    /// Stop serving requests, then clean up every session.
    pub fn stop_server(&self) {
        self.server.stop();
        self.proxy.stop_server();
        if let Some(load) = self.load.lock().as_ref() {
            load.stop();
        }
    }

    /// Start counting `LOAD` packets on the control socket.
    pub fn enable_load_stats(&self) -> Result<Arc<LoadStats>> {
        let stats = LoadStats::register(&self.server)?;
        *self.load.lock() = Some(stats.clone());
        Ok(stats)
    }

    pub fn proxy(&self) -> &Arc<AmpProxy<C>> {
        &self.proxy
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{Finished, Tracker};
    use crossbeam_channel::Receiver;
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct FakeBackend {
        url: String,
        rtp_port: u16,
        finished: Finished,
        stops: AtomicUsize,
    }

    impl Observee for FakeBackend {
        fn stop(&self) {
            if self.finished.finish() {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn observe(&self, tracker: &Tracker) -> Receiver<()> {
            self.finished.observe(tracker)
        }
    }

    impl Backend for FakeBackend {
        fn media_url(&self) -> &str {
            &self.url
        }

        fn rtp_port(&self) -> u16 {
            self.rtp_port
        }
    }

    impl fmt::Display for FakeBackend {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake {}", self.url)
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        fail: bool,
        starts: Mutex<Vec<(String, u16, Option<PathBuf>)>>,
    }

    impl Connector for FakeConnector {
        type Client = FakeBackend;

        fn start(
            &self,
            media_url: &Url,
            rtp_port: u16,
            log_file: Option<PathBuf>,
        ) -> Result<Arc<FakeBackend>> {
            self.starts
                .lock()
                .push((media_url.to_string(), rtp_port, log_file));
            if self.fail {
                return Err(ProxyError::RtspStatus {
                    method: "DESCRIBE".to_string(),
                    status: 404,
                    reason: "Not Found".to_string(),
                });
            }
            Ok(Arc::new(FakeBackend {
                url: media_url.to_string(),
                rtp_port,
                finished: Finished::new(),
                stops: AtomicUsize::new(0),
            }))
        }
    }

    fn proxy(min_port: u16, connector: FakeConnector) -> AmpProxy<FakeConnector> {
        let mut config = ProxyConfig::new("127.0.0.1:0", "rtsp://media.local:8554/", "127.0.0.1");
        config.min_port = min_port;
        config.max_port = min_port + 20;
        AmpProxy::new(&config, connector).unwrap()
    }

    fn start_desc(port: u16) -> StartSession {
        StartSession {
            receiver_host: "127.0.0.1".to_string(),
            port,
            media_file: "movie.ts".to_string(),
        }
    }

    fn stop_desc(port: u16) -> StopSession {
        StopSession {
            receiver_host: "127.0.0.1".to_string(),
            port,
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn start_then_stop_session() {
        let proxy = proxy(44000, FakeConnector::default());
        proxy.start_session(&start_desc(6000)).unwrap();

        let key = ClientKey::new("127.0.0.1", 6000);
        assert_eq!(key.as_str(), "127.0.0.1:6000");
        let session = proxy.session(&key).unwrap();
        assert_eq!(session.backend().media_url(), "rtsp://media.local:8554/movie.ts");
        assert_eq!(session.rtp_relay().inbound_port(), 44000);
        assert_eq!(session.rtcp_relay().inbound_port(), 44001);
        assert_eq!(session.rtp_relay().target_addr().port(), 6000);
        assert_eq!(session.rtcp_relay().target_addr().port(), 6001);
        assert_eq!(proxy.connector().starts.lock()[0].1, 44000);
        assert_eq!(proxy.clients(), vec![key.clone()]);

        proxy.stop_session(&stop_desc(6000)).unwrap();
        assert_eq!(proxy.session_count(), 0);
        assert!(session.rtp_relay().is_closed());
        assert!(session.rtcp_relay().is_closed());
        assert_eq!(session.backend().stops.load(Ordering::SeqCst), 1);

        assert!(matches!(
            proxy.stop_session(&stop_desc(6000)),
            Err(ProxyError::SessionNotFound(_))
        ));
    }

    #[test]
    fn duplicate_start_is_rejected() {
        let proxy = proxy(44100, FakeConnector::default());
        proxy.start_session(&start_desc(6100)).unwrap();
        assert!(matches!(
            proxy.start_session(&start_desc(6100)),
            Err(ProxyError::SessionExists(_))
        ));
        assert_eq!(proxy.session_count(), 1);
        assert_eq!(proxy.connector().starts.lock().len(), 1);
        proxy.stop_server();
    }

    #[test]
    fn backend_failure_releases_relays() {
        let proxy = proxy(
            44200,
            FakeConnector {
                fail: true,
                ..Default::default()
            },
        );
        let err = proxy.start_session(&start_desc(6200)).unwrap_err();
        assert!(matches!(err, ProxyError::BackendStart(_)));
        assert!(err.to_string().starts_with("failed to start RTSP client"));

        assert_eq!(proxy.session_count(), 0);
        UdpSocket::bind("127.0.0.1:44200").unwrap();
        UdpSocket::bind("127.0.0.1:44201").unwrap();
    }

    #[test]
    fn backend_ending_cleans_up_session() {
        let proxy = proxy(44300, FakeConnector::default());
        let started = Arc::new(AtomicUsize::new(0));
        let ended = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        proxy.on_backend_started(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let e = ended.clone();
        proxy.on_backend_ended(move |backend| {
            assert!(backend.finished.is_finished());
            e.fetch_add(1, Ordering::SeqCst);
        });

        proxy.start_session(&start_desc(6300)).unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let session = proxy.session(&ClientKey::new("127.0.0.1", 6300)).unwrap();
        // Backend hangs up on its own.
        session.backend().finished.finish();

        wait_until(|| proxy.session_count() == 0);
        wait_until(|| ended.load(Ordering::SeqCst) == 1);
        assert!(session.rtp_relay().is_closed());
        assert!(matches!(
            proxy.stop_session(&stop_desc(6300)),
            Err(ProxyError::SessionNotFound(_))
        ));
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_count_tracks_starts_and_stops() {
        let proxy = proxy(44400, FakeConnector::default());
        for port in [6400, 6402, 6404] {
            proxy.start_session(&start_desc(port)).unwrap();
        }
        proxy.stop_session(&stop_desc(6402)).unwrap();
        assert!(proxy.stop_session(&stop_desc(6402)).is_err());
        assert_eq!(proxy.session_count(), 2);

        assert_eq!(proxy.stop_server(), 2);
        assert_eq!(proxy.session_count(), 0);
    }

    #[test]
    fn transcript_name_includes_port_and_media() {
        let mut config = ProxyConfig::new("127.0.0.1:0", "rtsp://media.local/", "127.0.0.1");
        config.min_port = 44500;
        config.max_port = 44520;
        config.backend_log_dir = Some(PathBuf::from("/var/log/amp"));
        let proxy = AmpProxy::new(&config, FakeConnector::default()).unwrap();

        let mut desc = start_desc(6500);
        desc.media_file = "films/movie.ts".to_string();
        proxy.start_session(&desc).unwrap();

        let starts = proxy.connector().starts.lock().clone();
        assert_eq!(starts[0].0, "rtsp://media.local/films/movie.ts");
        assert_eq!(
            starts[0].2.as_deref(),
            Some(std::path::Path::new("/var/log/amp/amp-proxy-44500-films_movie.ts.log"))
        );
        proxy.stop_server();
    }

    #[test]
    fn media_name_stays_below_backend_url() {
        let mut config = ProxyConfig::new("127.0.0.1:0", "rtsp://media.local:8554/vod/", "127.0.0.1");
        config.min_port = 44800;
        config.max_port = 44820;
        let proxy = AmpProxy::new(&config, FakeConnector::default()).unwrap();

        let names = ["//evil.example:9/x", "rtsp://other.host/y", "clip?.ts", "a#b"];
        for (i, name) in names.iter().enumerate() {
            let mut desc = start_desc(6800 + 2 * i as u16);
            desc.media_file = name.to_string();
            proxy.start_session(&desc).unwrap();
        }

        let urls: Vec<Url> = proxy
            .connector()
            .starts
            .lock()
            .iter()
            .map(|(url, _, _)| Url::parse(url).unwrap())
            .collect();
        assert_eq!(urls.len(), names.len());
        for url in &urls {
            assert_eq!(url.scheme(), "rtsp");
            assert_eq!(url.host_str(), Some("media.local"));
            assert_eq!(url.port(), Some(8554));
            assert!(url.path().starts_with("/vod/"), "{url}");
            assert_eq!(url.query(), None);
            assert_eq!(url.fragment(), None);
        }
        assert_eq!(urls[0].as_str(), "rtsp://media.local:8554/vod/evil.example:9/x");
        assert_eq!(urls[2].as_str(), "rtsp://media.local:8554/vod/clip%3F.ts");
        assert_eq!(urls[3].as_str(), "rtsp://media.local:8554/vod/a%23b");
        proxy.stop_server();
    }

    #[test]
    fn media_name_without_path_is_rejected() {
        let proxy = proxy(44900, FakeConnector::default());
        let mut desc = start_desc(6900);
        desc.media_file = "../.".to_string();
        assert!(matches!(
            proxy.start_session(&desc),
            Err(ProxyError::InvalidUrl { .. })
        ));
        assert!(proxy.connector().starts.lock().is_empty());
        UdpSocket::bind("127.0.0.1:44900").unwrap();
    }

    #[test]
    fn handle_replies() {
        let proxy = proxy(44600, FakeConnector::default());

        let reply = proxy.handle(&start_desc(6600).to_packet()).unwrap();
        assert!(reply.is_ok());

        let malformed = Packet::new(Code::StartSession).add_header("Receiver-Host", "127.0.0.1");
        let reply = proxy.handle(&malformed).unwrap();
        assert_eq!(reply.code, Code::Error);
        assert!(reply.reason().unwrap().contains("illegal value"));

        let reply = proxy.handle(&stop_desc(6999).to_packet()).unwrap();
        assert_eq!(reply.reason(), Some("session not found for client 127.0.0.1:6999"));

        assert!(proxy.handle(&Packet::new(Code::Other("PING".into()))).is_none());
        assert!(proxy.handle(&Packet::ok()).is_none());

        proxy.handle(&stop_desc(6600).to_packet()).unwrap();
        assert_eq!(proxy.session_count(), 0);
    }

    #[test]
    fn rejects_non_rtsp_url() {
        let config = ProxyConfig::new("127.0.0.1:0", "http://media.local/", "127.0.0.1");
        assert!(matches!(
            AmpProxy::new(&config, FakeConnector::default()),
            Err(ProxyError::InvalidUrl { .. })
        ));

        let config = ProxyConfig::new("127.0.0.1:0", "not a url", "127.0.0.1");
        assert!(AmpProxy::new(&config, FakeConnector::default()).is_err());
    }

    #[test]
    fn port_overflow_is_illegal() {
        let proxy = proxy(44700, FakeConnector::default());
        assert!(matches!(
            proxy.start_session(&start_desc(u16::MAX)),
            Err(ProxyError::IllegalValue { .. })
        ));
        assert_eq!(proxy.session_count(), 0);
    }
}
