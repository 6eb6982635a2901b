use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use zerotouch::admin::{AdminServer, PKG_NAME, VERSION};
use zerotouch::config::Config;
use zerotouch::scanner::ScanController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zerotouch=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    // Print startup banner
    print_startup_banner(&config);

    // Write PID file if configured (with exclusive lock on Unix)
    let pid_file_path = config.server.pid_file.as_ref().map(PathBuf::from);
    let _pid_file = if let Some(ref path) = pid_file_path {
        let pid_file = write_pid_file(path)?;
        info!(path = %path.display(), "PID file written and locked");
        Some(pid_file)
    } else {
        None
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller = Arc::new(ScanController::new(&config));

    // Capacity 1: a scan requested while one is pending coalesces into it
    let (scan_tx, mut scan_rx) = mpsc::channel::<()>(1);

    // Admin server
    let admin_addr: SocketAddr = format!("{}:{}", config.server.admin_bind, config.server.admin_port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.admin_bind, port = config.server.admin_port, error = %e, "Invalid admin bind address");
            anyhow::anyhow!("Invalid admin bind address: {}", e)
        })?;

    // Generate or use configured admin token
    let admin_token = config.server.admin_token.clone().unwrap_or_else(|| {
        let token = uuid::Uuid::new_v4().to_string();
        info!(token = %token, "Generated admin API token (configure admin_token to set a fixed value)");
        token
    });

    let admin_server = AdminServer::new(
        admin_addr,
        Arc::clone(&controller),
        scan_tx.clone(),
        shutdown_rx.clone(),
        admin_token,
    );

    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!(error = %e, "Admin server error");
        }
    });

    // Run the first cycle immediately so nginx reflects the directory at startup
    run_scan(&controller).await;

    // Periodic scan ticker (scan_interval_secs = 0 disables it)
    let scan_interval = config.campaigns.scan_interval();
    let mut ticker = scan_interval.map(|interval| {
        let mut t = tokio::time::interval(interval);
        t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and the startup scan already ran
        t.reset();
        t
    });

    match scan_interval {
        Some(interval) => info!(interval_secs = interval.as_secs(), "Periodic scanning enabled"),
        None => info!("Periodic scanning disabled; scans run on demand only"),
    }

    // Main loop: scans and signals
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup())
            .expect("Failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, running scan cycle...");
                    run_scan(&controller).await;
                }
                _ = maybe_tick(&mut ticker) => {
                    run_scan(&controller).await;
                }
                recv = scan_rx.recv() => {
                    match recv {
                        Some(()) => run_scan(&controller).await,
                        None => break,
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }
                _ = maybe_tick(&mut ticker) => {
                    run_scan(&controller).await;
                }
                recv = scan_rx.recv() => {
                    match recv {
                        Some(()) => run_scan(&controller).await,
                        None => break,
                    }
                }
            }
        }
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for the admin server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), admin_handle).await;

    // Clean up PID file
    if let Some(ref path) = pid_file_path {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on the next periodic tick, or never when periodic scanning is disabled
async fn maybe_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_scan(controller: &ScanController) {
    if let Err(e) = controller.scan(false).await {
        error!(error = %e, "Scan cycle failed");
    }
}

/// PID file handle that maintains an exclusive lock
#[cfg(unix)]
struct PidFile {
    _file: std::fs::File,
}

#[cfg(unix)]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Try to acquire exclusive lock (non-blocking)
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                anyhow::bail!("Another instance is already running (PID file is locked)");
            }
            return Err(err.into());
        }

        // Write PID
        let pid = std::process::id();
        use std::io::Write;
        writeln!(&file, "{}", pid)?;

        // Keep the file handle open to maintain the lock
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
struct PidFile;

#[cfg(not(unix))]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        let pid = std::process::id();
        let mut file = std::fs::File::create(path)?;
        use std::io::Write;
        writeln!(file, "{}", pid)?;
        Ok(Self)
    }
}

fn write_pid_file(path: &Path) -> anyhow::Result<PidFile> {
    PidFile::create(path)
}

fn print_startup_banner(config: &Config) {
    info!(
        name = PKG_NAME,
        version = VERSION,
        "Starting zero-touch deployment daemon"
    );
    info!(
        admin_bind = %config.server.admin_bind,
        admin_port = config.server.admin_port,
        "Server configuration"
    );
    info!(
        root = %config.campaigns.root.display(),
        scan_interval_secs = config.campaigns.scan_interval_secs,
        "Campaign scanning settings"
    );
    info!(
        config_path = %config.nginx.config_path.display(),
        validate_command = %config.nginx.validate_command,
        reload_command = %config.nginx.reload_command,
        pid_file = ?config.nginx.pid_file,
        "nginx integration settings"
    );
    info!(
        entry_points = ?config.markers.entry_points,
        framework_dirs = ?config.markers.framework_dirs,
        manifests = ?config.markers.manifests,
        dynamic_extensions = ?config.markers.dynamic_extensions,
        "Classification markers"
    );
}
