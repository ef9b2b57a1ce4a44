use clap::Parser;
use log::{error, info};
use monitor::config::SessionConfig;
use monitor::handle::SessionHandle;
use monitor::session::Session;
use monitor::storage::JsonFileStore;
use rcon::RconClient;
use tokio::sync::oneshot;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Polls a Factorio server over RCON and tracks who is playing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RCON host
    #[arg(short = 'H', long, env = "RCON_HOST", default_value = "localhost")]
    host: String,

    /// RCON port
    #[arg(short, long, env = "RCON_PORT", default_value = "27015")]
    port: u16,

    /// RCON password
    #[arg(long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Directory holding players.json
    #[arg(short = 'd', long, env = "STATE_DIR", default_value = ".")]
    state_dir: String,

    /// Poll interval in milliseconds while players are online
    #[arg(long, default_value = "1000")]
    active_interval: u64,

    /// Poll interval in milliseconds while the server is empty
    #[arg(long, default_value = "30000")]
    idle_interval: u64,

    /// Initial reconnect delay in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_floor: u64,

    /// Longest reconnect delay in milliseconds
    #[arg(long, default_value = "20000")]
    backoff_ceiling: u64,

    /// How long a command may wait for its response, in milliseconds
    #[arg(long, default_value = "10000")]
    command_timeout: u64,

    /// Seconds between status lines in the log, 0 to disable
    #[arg(long, default_value = "60")]
    report_interval: u64,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            active_poll_interval: Duration::from_millis(self.active_interval),
            idle_poll_interval: Duration::from_millis(self.idle_interval),
            backoff_floor: Duration::from_millis(self.backoff_floor),
            backoff_ceiling: Duration::from_millis(self.backoff_ceiling),
            command_timeout: Duration::from_millis(self.command_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting monitor for {}", address);
    let store = JsonFileStore::new(&args.state_dir);
    info!("Player records at {}", store.path().display());

    let (client, events) = RconClient::spawn(address, args.password.clone());
    let (session, handle) = Session::new(args.session_config(), client, events, store);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut session_handle = tokio::spawn(session.run(async {
        let _ = stop_rx.await;
    }));

    if args.report_interval > 0 {
        let handle = handle.clone();
        let period = Duration::from_secs(args.report_interval);
        tokio::spawn(async move {
            report_status(handle, period).await;
        });
    }

    tokio::select! {
        result = &mut session_handle => {
            if let Err(e) = result {
                error!("Session task panicked: {}", e);
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    let _ = stop_tx.send(());
    if let Err(e) = session_handle.await {
        error!("Session task panicked: {}", e);
    }

    Ok(())
}

/// Logs a one-line summary of the latest snapshot every `period`.
async fn report_status(handle: SessionHandle, period: Duration) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    timer.tick().await;

    loop {
        timer.tick().await;

        let snapshot = handle.snapshot();
        let online = snapshot
            .players
            .values()
            .filter(|record| record.online)
            .count();

        info!(
            "Status: {:?}, {} of {} known players online, version {}",
            snapshot.connection_state,
            online,
            snapshot.players.len(),
            snapshot.version.as_deref().unwrap_or("unknown")
        );
    }
}
