use amp_proxy::proxy::{MAX_RELAY_PORT, MIN_RELAY_PORT};
use amp_proxy::{ProxyConfig, ProxyServer};
use clap::Parser;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "amp-proxy",
    about = "Proxy AMP session requests to an RTSP media server"
)]
struct Args {
    /// AMP control address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:7770")]
    listen: String,

    /// Base RTSP URL of the backend media server
    #[arg(long)]
    rtsp_url: String,

    /// Local host the UDP relays bind to
    #[arg(long, default_value = "127.0.0.1")]
    relay_host: String,

    /// Lowest relay port
    #[arg(long, default_value_t = MIN_RELAY_PORT)]
    min_port: u16,

    /// Highest relay port
    #[arg(long, default_value_t = MAX_RELAY_PORT)]
    max_port: u16,

    /// Directory for per-session RTSP transcripts
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Count LOAD packets on the control port
    #[arg(long)]
    load_stats: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = ProxyConfig::new(&args.listen, &args.rtsp_url, &args.relay_host);
    config.min_port = args.min_port;
    config.max_port = args.max_port;
    config.backend_log_dir = args.log_dir;

    let server = match ProxyServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to create proxy: {}", e);
            return;
        }
    };

    let load = if args.load_stats {
        match server.enable_load_stats() {
            Ok(load) => Some(load),
            Err(e) => {
                eprintln!("Failed to enable load stats: {}", e);
                return;
            }
        }
    } else {
        None
    };

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!(
        "AMP proxy on {} -> {}, press Enter to stop",
        server.local_addr(),
        args.rtsp_url
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop_server();

    if let Some(load) = load {
        let received = load.received().snapshot();
        let missed = load.missed().snapshot();
        println!(
            "Load: {} received ({:.1}/s), {} missed",
            received.total,
            received.per_second(),
            missed.total
        );
    }
}
