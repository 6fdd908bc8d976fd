use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teleop_gateway::audio::{enumerate_audio_devices, AudioSource};
use teleop_gateway::config::{AppConfig, ConfigStore, ProtocolVariant};
use teleop_gateway::control::ControlRelay;
use teleop_gateway::state::AppState;
use teleop_gateway::stream::MediaGateway;
use teleop_gateway::utils::bind_tcp_listener;
use teleop_gateway::video::{enumerate_devices, FrameSource};
use teleop_gateway::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Teleop Gateway command line arguments
#[derive(Parser, Debug)]
#[command(name = "teleop-gateway")]
#[command(version, about = "Low-latency video, audio and gamepad relay for teleoperation", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Data directory path (default: /etc/teleop-gateway)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Video capture device (e.g. /dev/video0)
    #[arg(long, value_name = "DEVICE")]
    video_device: Option<String>,

    /// Stream width after resize
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Stream height after resize
    #[arg(long, value_name = "PIXELS")]
    height: Option<u32>,

    /// JPEG quality (1-100)
    #[arg(long, value_name = "QUALITY")]
    quality: Option<u32>,

    /// Requested capture frame rate
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// ALSA capture device (e.g. hw:1,0)
    #[arg(long, value_name = "DEVICE")]
    audio_device: Option<String>,

    /// Disable audio capture
    #[arg(long)]
    no_audio: bool,

    /// Remote receiver host
    #[arg(long, value_name = "HOST")]
    remote_host: Option<String>,

    /// Remote receiver UDP port
    #[arg(long, value_name = "PORT")]
    remote_port: Option<u16>,

    /// Control packet layout (single, multi)
    #[arg(long, value_name = "VARIANT")]
    variant: Option<ProtocolVariant>,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting Teleop Gateway v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let db_path = data_dir.join("teleop-gateway.db");
    let config_store = ConfigStore::new(&db_path).await?;

    if args.list_devices {
        let mut config = AppConfig::clone(&config_store.get());
        apply_cli_overrides(&mut config, &args);
        list_devices(&config).await?;
        return Ok(());
    }

    // Overrides are written back so the next start sees them
    config_store
        .update(|config| apply_cli_overrides(config, &args))
        .await?;
    let config = config_store.get();

    let bind_ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let bind_addr = SocketAddr::new(bind_ip, config.web.http_port);
    tracing::info!("Server will listen on: http://{}", bind_addr);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Media failures are logged; the gateway keeps serving without that source
    let frames = Arc::new(FrameSource::new());
    if let Err(e) = frames.start(&config.video).await {
        tracing::error!("Video capture unavailable: {}", e);
    }

    let audio = Arc::new(AudioSource::new());
    if config.audio.enabled {
        if let Err(e) = audio.start(&config.audio).await {
            tracing::error!("Audio capture unavailable: {}", e);
        }
    } else {
        tracing::info!("Audio capture disabled");
    }

    let relay = Arc::new(ControlRelay::from_config(&config.control).await?);

    let gateway = MediaGateway::new(frames, audio, shutdown_tx.clone());
    let state = AppState::new(
        config_store,
        gateway,
        relay,
        shutdown_tx.clone(),
    );

    let app = web::create_router(state.clone());

    let listener = bind_tcp_listener(bind_addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = {
        let state = state.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown signal received");
            // Ends every frame sequence and viewer socket so the server can drain
            state.gateway.shutdown();
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!("HTTP server error: {}", e);
    }

    cleanup(&state).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(addr) = &args.address {
        config.web.bind_address = addr.clone();
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(device) = &args.video_device {
        config.video.device = device.clone();
    }
    if let Some(width) = args.width {
        config.video.width = width;
    }
    if let Some(height) = args.height {
        config.video.height = height;
    }
    if let Some(quality) = args.quality {
        config.video.quality = quality;
    }
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some(device) = &args.audio_device {
        config.audio.device = device.clone();
    }
    if args.no_audio {
        config.audio.enabled = false;
    }
    if let Some(host) = &args.remote_host {
        config.control.remote_host = host.clone();
    }
    if let Some(port) = args.remote_port {
        config.control.remote_port = port;
    }
    if let Some(variant) = args.variant {
        config.control.variant = variant;
    }
}

/// Print capture devices found on this host, marking the ones the
/// effective configuration can use
async fn list_devices(config: &AppConfig) -> anyhow::Result<()> {
    let (video, audio) = tokio::task::spawn_blocking(|| {
        (enumerate_devices(), enumerate_audio_devices())
    })
    .await?;

    println!("Video capture devices:");
    if video.is_empty() {
        println!("  (none)");
    }
    for device in &video {
        let formats: Vec<String> = device.formats.iter().map(|f| f.to_string()).collect();
        let configured = device.path == PathBuf::from(&config.video.device);
        println!(
            "{} {}  {} [{}] formats: {}{}",
            if configured { "*" } else { " " },
            device.path.display(),
            device.name,
            device.driver,
            formats.join(", "),
            if device.supports_mjpeg() { "" } else { " (no MJPEG, encoded in software)" }
        );
    }

    println!("Audio capture devices:");
    if audio.is_empty() {
        println!("  (none)");
    }
    for device in &audio {
        let rates: Vec<String> = device.sample_rates.iter().map(|r| r.to_string()).collect();
        let configured = device.name == config.audio.device;
        let usable = device.supports(config.audio.sample_rate, config.audio.channels);
        println!(
            "{} {}  {}{} rates: {}{}",
            if configured { "*" } else { " " },
            device.name,
            device.description,
            if device.is_hdmi { " (capture card)" } else { "" },
            rates.join(", "),
            if usable {
                String::new()
            } else {
                format!(
                    " (cannot capture {} Hz x{})",
                    config.audio.sample_rate, config.audio.channels
                )
            }
        );
    }

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "teleop_gateway=error,tower_http=error",
        LogLevel::Warn => "teleop_gateway=warn,tower_http=warn",
        LogLevel::Info => "teleop_gateway=info,tower_http=info",
        LogLevel::Verbose => "teleop_gateway=debug,tower_http=info",
        LogLevel::Debug => "teleop_gateway=debug,tower_http=debug",
        LogLevel::Trace => "teleop_gateway=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("TELEOP_GATEWAY_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/teleop-gateway")
}

/// Clean up sources on shutdown
async fn cleanup(state: &Arc<AppState>) {
    state.stop_sources().await;
    tracing::info!("Capture sources stopped");
}
