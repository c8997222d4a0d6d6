use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voice_chat_client::audio::{list_input_devices, list_output_devices, DeviceInfo};
use voice_chat_client::playback::RodioSurface;
use voice_chat_client::terminal::{self, TerminalCommand};
use voice_chat_client::{
    create_router, AppState, AudioBackendFactory, Config, Session, SessionConfig, SessionHandle,
};

#[derive(Parser)]
#[command(
    name = "voice-chat-client",
    about = "Real-time voice conversation client",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (extension optional)
    #[arg(short, long, global = true, default_value = "config/voice-chat-client")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and converse (default)
    Run(RunArgs),

    /// List audio input and output devices
    Devices,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Voice service url (ws:// or wss://)
    #[arg(long)]
    url: Option<String>,

    /// Input device name
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name
    #[arg(long)]
    output_device: Option<String>,

    /// Replay a WAV file instead of using the microphone
    #[arg(long, value_name = "WAV")]
    replay: Option<PathBuf>,

    /// Do not play reply audio automatically
    #[arg(long)]
    no_autoplay: bool,

    /// Do not connect until asked
    #[arg(long)]
    no_connect: bool,

    /// Serve the HTTP control API
    #[arg(long)]
    http: bool,

    /// Start listening as soon as the connection opens
    #[arg(long)]
    listen: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Devices => print_devices(),
        Commands::Run(args) => {
            let mut cfg = Config::load(&cli.config)?;
            apply_overrides(&mut cfg, &args);
            run(cfg, args).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_overrides(cfg: &mut Config, args: &RunArgs) {
    if let Some(url) = &args.url {
        cfg.server.url = url.clone();
    }
    if let Some(device) = &args.input_device {
        cfg.audio.input_device = device.clone();
    }
    if let Some(device) = &args.output_device {
        cfg.playback.output_device = device.clone();
    }
    if args.no_autoplay {
        cfg.playback.autoplay = false;
    }
    if args.no_connect {
        cfg.server.connect_on_start = false;
    }
    if args.http {
        cfg.http.enabled = true;
    }
}

fn print_devices() -> Result<()> {
    fn print_list(title: &str, devices: &[DeviceInfo]) {
        println!("{}:", title);
        if devices.is_empty() {
            println!("  (none)");
        }
        for device in devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("  {}{}", device.name, marker);
        }
    }

    print_list("Input devices", &list_input_devices()?);
    print_list("Output devices", &list_output_devices()?);
    Ok(())
}

async fn run(cfg: Config, args: RunArgs) -> Result<()> {
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Voice service: {}", cfg.server.url);

    let mut session_config = SessionConfig::from_config(&cfg);
    if let Some(path) = &args.replay {
        info!("Replaying {} as microphone input", path.display());
        session_config = session_config.with_replay(path);
    }

    let backend =
        AudioBackendFactory::create(session_config.source.clone(), session_config.backend.clone());
    let output_device = session_config.output_device.clone();
    let (mut session, handle) = Session::new(session_config, backend);

    match RodioSurface::new(output_device) {
        Ok(surface) => session.attach_surface(Box::new(surface)),
        Err(e) => warn!("Reply audio will not play: {:#}", e),
    }

    let session_task = tokio::spawn(session.run());
    let render_task = tokio::spawn(render(handle.clone()));

    if cfg.http.enabled {
        let addr = cfg.http_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP API on {}", addr))?;
        info!("HTTP API listening on http://{}", addr);
        let router = create_router(AppState::new(handle.clone()));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("HTTP server stopped: {}", e);
            }
        });
    }

    if args.listen {
        let handle = handle.clone();
        tokio::spawn(async move { start_when_connected(&handle).await });
    }

    println!("{}", terminal::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    // stdin closed; keep serving until interrupted
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Interrupted");
                    }
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match terminal::parse_command(&line) {
                    Some(TerminalCommand::Quit) => break,
                    Some(command) => dispatch(&handle, command).await,
                    None => println!("unknown command: {}", line.trim()),
                }
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!("Session already stopped: {}", e);
    }
    session_task.await.context("Session task panicked")??;
    render_task.abort();
    Ok(())
}

async fn dispatch(handle: &SessionHandle, command: TerminalCommand) {
    let result = match command {
        TerminalCommand::Start => handle.start_listening().await.map(|_| ()),
        TerminalCommand::Stop => handle.stop_listening().await,
        TerminalCommand::Connect => handle.connect(None).await,
        TerminalCommand::Disconnect => handle.disconnect().await,
        TerminalCommand::Stats => {
            println!("{}", terminal::format_stats(&handle.stats()));
            Ok(())
        }
        TerminalCommand::Help => {
            println!("{}", terminal::HELP);
            Ok(())
        }
        TerminalCommand::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("[error] {}", e);
    }
}

async fn start_when_connected(handle: &SessionHandle) {
    let mut snapshots = handle.watch_snapshot();
    let connected = snapshots
        .wait_for(|snapshot| snapshot.connection.is_connected())
        .await
        .is_ok();

    if connected {
        if let Err(e) = handle.start_listening().await {
            warn!("Could not start listening: {}", e);
        }
    }
}

async fn render(handle: SessionHandle) {
    let mut snapshots = handle.watch_snapshot();
    let mut previous = snapshots.borrow_and_update().clone();

    while snapshots.changed().await.is_ok() {
        let next = snapshots.borrow_and_update().clone();
        for line in terminal::describe_changes(&previous, &next) {
            println!("{}", line);
        }
        previous = next;
    }
}
