//! `ledwall`: command-line front end for the LED wall.
//!
//! Talks to a device through `ledwall-sync`: one-shot fetches, a live view of
//! the stream, single paints, and a local reference device to test against.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use ledwall_core::{Color, Led, SystemClock, UpdateSource};
use ledwall_sync::config::DEFAULT_BASE_URL;
use ledwall_sync::{
    ApiClient, ConfigError, LedServer, LedSession, ServerConfig, SessionHandle, SessionStatus,
    SyncConfig,
};
use log::info;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "ledwall", version)]
struct Cli {
    /// API base URL, e.g. http://localhost:8000/api. Falls back to
    /// $LEDWALL_API_BASE_URL, then to the local default.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every LED once.
    Fetch,
    /// Follow the stream and print LEDs as they change.
    Watch(WatchArgs),
    /// Paint one LED.
    Paint(PaintArgs),
    /// Run a reference LED device.
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct WatchArgs {
    /// Requested snapshot cadence in milliseconds (the device may clamp it).
    #[arg(long)]
    snapshot_interval: Option<u64>,
}

#[derive(Parser, Debug)]
struct PaintArgs {
    /// LED index (0-based).
    index: usize,

    /// Color as #rrggbb, rrggbb or #rgb.
    color: Color,

    /// Send through `POST /leds/{id}` instead of the stream.
    #[arg(long, default_value_t = false)]
    rest: bool,

    /// How long to wait for the device to confirm, in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Number of LEDs.
    #[arg(long, default_value_t = 250)]
    leds: usize,

    /// Initial color of every LED.
    #[arg(long, default_value = "#ffffff")]
    color: Color,

    /// Default snapshot cadence in milliseconds.
    #[arg(long, default_value_t = ledwall_sync::server::MIN_SNAPSHOT_INTERVAL_MS)]
    snapshot_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Fetch => cmd_fetch(sync_config(cli.base_url)?).await,
        Command::Watch(args) => cmd_watch(sync_config(cli.base_url)?, args).await,
        Command::Paint(args) => cmd_paint(sync_config(cli.base_url)?, args).await,
        Command::Serve(args) => cmd_serve(args).await,
    }
}

fn sync_config(base_url: Option<String>) -> anyhow::Result<SyncConfig> {
    let config = match base_url {
        Some(url) => SyncConfig::new(&url),
        None => match SyncConfig::from_env() {
            Err(ConfigError::MissingEnv(_)) => SyncConfig::new(DEFAULT_BASE_URL),
            other => other,
        },
    };
    config.context("invalid base URL")
}

fn format_led(index: usize, led: &Led) -> String {
    let source = match led.source {
        UpdateSource::Local => "local",
        UpdateSource::Remote => "remote",
    };
    format!("{index:>4} {} {} ({source})", led.color, led.last_update.to_rfc3339())
}

async fn cmd_fetch(config: SyncConfig) -> anyhow::Result<()> {
    let api = ApiClient::from_config(&config);
    let leds = api
        .fetch_leds_with_retry(&config.fetch_retry)
        .await
        .with_context(|| format!("fetch {}", config.leds_url()))?;

    for (index, led) in leds.iter().enumerate() {
        println!("{index:>4} {} {}", led.color, led.timestamp.to_rfc3339());
    }
    Ok(())
}

async fn wait_connected(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut status = handle.watch_status();
    let reached = status
        .wait_for(|s| *s == SessionStatus::Connected || s.is_terminal())
        .await
        .map(|s| (*s).clone())
        .context("session ended unexpectedly")?;
    match reached {
        SessionStatus::Connected => Ok(()),
        SessionStatus::FetchFailed(message) => bail!("initial fetch failed: {message}"),
        other => bail!("session ended while connecting ({other:?})"),
    }
}

async fn cmd_watch(mut config: SyncConfig, args: WatchArgs) -> anyhow::Result<()> {
    config.snapshot_interval_ms = args.snapshot_interval;
    let session = LedSession::start(config, Arc::new(SystemClock))?;
    let handle = session.handle();

    let mut leds = handle.leds();
    let mut status = handle.watch_status();
    let mut shown: Vec<Led> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!("Status: {current:?}");
                if let SessionStatus::FetchFailed(message) = current {
                    bail!("initial fetch failed: {message}");
                }
                if current.is_terminal() {
                    break;
                }
            }
            changed = leds.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = leds.borrow_and_update().clone();
                for (index, led) in current.iter().enumerate() {
                    if shown.get(index).map(|old| old.color) != Some(led.color) {
                        println!("{}", format_led(index, led));
                    }
                }
                shown = current;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn cmd_paint(config: SyncConfig, args: PaintArgs) -> anyhow::Result<()> {
    let api = ApiClient::from_config(&config);
    if args.rest {
        api.set_led(args.index, args.color)
            .await
            .with_context(|| format!("POST {}", config.led_url(args.index)))?;
        println!("LED {} set to {}", args.index, args.color);
        return Ok(());
    }

    let session = LedSession::start(config, Arc::new(SystemClock))?;
    let handle = session.handle();
    let wait = Duration::from_secs(args.timeout);

    let outcome = tokio::time::timeout(wait, async {
        wait_connected(&handle).await?;
        if !handle.paint(args.index, args.color).await? {
            println!("LED {} already shows {}", args.index, args.color);
            return Ok(());
        }

        // The stream keeps showing the optimistic value, so ask the device.
        loop {
            let led = api.fetch_led(args.index).await?;
            if led.color == args.color {
                break;
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
        println!("LED {} set to {}", args.index, args.color);
        anyhow::Ok(())
    })
    .await;

    session.shutdown().await;
    match outcome {
        Ok(result) => result,
        Err(_) => bail!("device did not confirm LED {} within {}s", args.index, args.timeout),
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig {
        bind_addr: args.bind,
        led_count: args.leds,
        default_color: args.color,
        snapshot_interval_ms: args.snapshot_interval,
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;

    LedServer::new(config)
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server failed")
}
