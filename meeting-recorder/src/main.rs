//! meeting-recorder: list devices and audio sessions, record a meeting.

mod meter;
mod platform;

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use meeting_capture_core::{
    AudioApplication, AudioSessionInfo, CaptureConfiguration, CaptureSession, LoopbackSource, RecordingResult,
    SourceTag,
};

use meter::PeakMeter;
use platform::Platform;

#[derive(Parser)]
#[command(name = "meeting-recorder")]
#[command(version)]
#[command(about = "Record a microphone together with an application's audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio devices from every available backend
    #[command(alias = "ls")]
    Devices {
        /// Also probe which candidate sample rates each device accepts
        #[arg(long)]
        probe: bool,
    },

    /// List applications with an OS audio session
    Sessions,

    /// Record until Ctrl-C or the duration elapses
    Record(RecordArgs),
}

#[derive(Args)]
struct RecordArgs {
    /// Microphone by device name (default: configured or system default input)
    #[arg(long)]
    mic: Option<String>,

    /// Record without a microphone
    #[arg(long, conflicts_with = "mic")]
    no_mic: bool,

    /// Application to capture, by process id
    #[arg(long, conflicts_with_all = ["app_name", "system"])]
    app_pid: Option<u32>,

    /// Application to capture, by process or display name
    #[arg(long, conflicts_with = "system")]
    app_name: Option<String>,

    /// Capture everything the default output device plays
    #[arg(long)]
    system: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Output WAV file (default: meeting-<timestamp>.wav)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON capture configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let platform = Platform::init();
    match cli.command {
        Commands::Devices { probe } => list_devices(&platform, probe),
        Commands::Sessions => list_sessions(&platform),
        Commands::Record(args) => record(&platform, args),
    }
}

fn list_devices(platform: &Platform, probe: bool) -> Result<()> {
    let devices = platform.catalog.devices();
    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    for device in devices.iter() {
        let mut flags = Vec::new();
        if device.is_input {
            flags.push("input");
        }
        if device.is_output {
            flags.push("output");
        }
        if device.is_loopback {
            flags.push("loopback");
        }
        if device.is_default {
            flags.push("default");
        }
        println!(
            "{:>5}  {:<8} {} ({} ch, {} Hz) [{}]",
            device.index,
            format!("{:?}", device.backend).to_lowercase(),
            device.name,
            device.channels,
            device.sample_rate,
            flags.join(", ")
        );
        if probe {
            let rates = platform.catalog.capabilities(device).sample_rates;
            let rates: Vec<String> = rates.iter().map(u32::to_string).collect();
            println!("         rates: {}", if rates.is_empty() { "none".into() } else { rates.join(", ") });
        }
    }
    Ok(())
}

fn session_snapshot(platform: &Platform) -> Result<Vec<AudioSessionInfo>> {
    let provider = platform
        .resolver
        .session_provider()
        .context("per-application capture is not available on this platform")?;
    provider.sessions().context("failed to list audio sessions")
}

fn list_sessions(platform: &Platform) -> Result<()> {
    let sessions = session_snapshot(platform)?;
    if sessions.is_empty() {
        println!("No audio sessions");
    }
    for session in sessions {
        println!(
            "{:>7}  {:<24} {}{}",
            session.process_id,
            session.process_name,
            session.display_name,
            if session.is_active { "  (playing)" } else { "" }
        );
    }
    Ok(())
}

fn application_from_session(session: &AudioSessionInfo) -> AudioApplication {
    AudioApplication {
        display_name: session.display_name.clone(),
        process_name: session.process_name.clone(),
        process_id: session.process_id,
        executable_path: PathBuf::from(&session.process_name),
        is_playing_audio: session.is_active,
        session_id: Some(session.session_id.clone()),
    }
}

/// Look the target up among live sessions. An unknown target is still
/// returned so the recorder can fall back to system loopback.
fn find_application(platform: &Platform, pid: Option<u32>, name: Option<&str>) -> AudioApplication {
    let sessions = session_snapshot(platform).unwrap_or_else(|e| {
        log::warn!("{:#}", e);
        Vec::new()
    });

    let found = sessions.iter().find(|s| match (pid, name) {
        (Some(pid), _) => s.process_id == pid,
        (None, Some(name)) => {
            s.process_name.eq_ignore_ascii_case(name)
                || s.display_name.eq_ignore_ascii_case(name)
                || Path::new(&s.process_name)
                    .file_stem()
                    .is_some_and(|stem| stem.to_string_lossy().eq_ignore_ascii_case(name))
        }
        (None, None) => false,
    });

    match found {
        Some(session) => application_from_session(session),
        None => {
            log::warn!("No audio session matches the requested application; loopback may fall back");
            let process_name = name.unwrap_or_default().to_string();
            AudioApplication {
                display_name: process_name.clone(),
                executable_path: PathBuf::from(&process_name),
                process_name,
                process_id: pid.unwrap_or(0),
                is_playing_audio: false,
                session_id: None,
            }
        }
    }
}

fn load_config(args: &RecordArgs) -> Result<CaptureConfiguration> {
    let mut config = match &args.config {
        Some(path) => CaptureConfiguration::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CaptureConfiguration::default(),
    };
    if let Some(mic) = &args.mic {
        config.microphone_device = Some(mic.clone());
    }
    if let Some(app) = &args.app_name {
        config.application_device = Some(app.clone());
    }
    Ok(config)
}

fn record(platform: &Platform, args: RecordArgs) -> Result<()> {
    let config = load_config(&args)?;
    let mut session = CaptureSession::new(platform.catalog.clone(), platform.resolver.clone(), config.clone())
        .context("invalid capture configuration")?;

    let meter = PeakMeter::new();
    session.set_delegate(meter.clone());

    let mic = if args.no_mic {
        None
    } else {
        let mic = session.preferred_microphone();
        if mic.is_none() {
            log::warn!("No microphone available; recording loopback only");
        }
        mic
    };

    let loopback = if args.system {
        Some(LoopbackSource::SystemAudio)
    } else if args.app_pid.is_some() || config.application_device.is_some() {
        let app = find_application(platform, args.app_pid, config.application_device.as_deref());
        log::info!("Target application: {} (pid {})", app.display_name, app.process_id);
        Some(LoopbackSource::Application(app))
    } else {
        None
    };

    if mic.is_none() && loopback.is_none() {
        bail!("nothing to record: no microphone and no --app-pid, --app-name or --system");
    }

    session.configure_sources(mic, loopback).context("failed to configure sources")?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("meeting-{}.wav", chrono::Local::now().format("%Y%m%d-%H%M%S"))));

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    session.start(&output).context("failed to start recording")?;
    match args.duration {
        Some(secs) => {
            println!("Recording for {} s, Ctrl-C to stop early...", secs);
            let _ = stop_rx.recv_timeout(Duration::from_secs(secs));
        }
        None => {
            println!("Recording, Ctrl-C to stop...");
            let _ = stop_rx.recv();
        }
    }

    match session.stop().context("failed to finish recording")? {
        Some(result) => print_result(&result, &meter),
        None => println!("Nothing was recorded"),
    }
    Ok(())
}

fn print_result(result: &RecordingResult, meter: &PeakMeter) {
    println!("Saved {}", result.file_path.display());
    println!(
        "  {:.1} s, {} Hz, {} ch, sha256 {}",
        result.duration_secs, result.sample_rate, result.channels, result.checksum
    );
    if let Some(tier) = meter.tier() {
        println!("  loopback via {}", tier);
    }
    for source in [SourceTag::Microphone, SourceTag::Application] {
        if let Some((peak_db, blocks)) = meter.summary(source) {
            println!("  {:<11} peak {:>6.1} dBFS over {} blocks", source.as_str(), peak_db, blocks);
        }
    }
}
