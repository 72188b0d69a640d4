//! bt-takeover - take over a Bluetooth speaker and play audio through it.

mod config;
mod picker;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use takeover_audio::{
    AudioEngine, NoopVolume, PactlVolume, PlaybackHandle, SinkFactory, VolumeControl,
};
use takeover_bluetooth::{
    DeviceLocator, PresenceWatcher, ProfileNegotiator, ProfileRegistry,
    SimulatedAdapter, SystemAdapter,
};
use takeover_client::{
    CallbackHandler, EngineBeep, OrchestratorBuilder, PresenceAlarm, TakeoverEvent,
    TakeoverOrchestrator, TakeoverRequest, DEFAULT_ALERT_PERIOD,
};
use takeover_core::{
    Address, AudioMode, CancellationToken, DeviceIdentifier, DiscoveredDevice, ProfileKind,
};
use tracing::info;

use config::{load_preferences, LoadedPreferences, DEFAULT_CONFIG_FILE};
use picker::PromptPicker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Locate, bond, connect and play.
    Takeover,
    /// Wait until the device is in range, then sound an alarm.
    Watch,
    /// Play the configured audio locally.
    Play,
    /// List bonded devices.
    Devices,
    /// Show which profiles the device is connected on.
    Status,
}

/// Command-line arguments
struct Args {
    command: Command,
    /// Preferences file
    config: PathBuf,
    /// Device address or name fragment, overriding the preferences
    id: Option<String>,
    /// Audio file, switching to file mode
    file: Option<PathBuf>,
    gain: Option<f32>,
    no_loop: bool,
    /// After `watch` finds the device, take it over
    takeover: bool,
    /// Use the in-process simulated adapter and a null audio sink
    simulate: bool,
    /// Enable debug logging to file
    debug: bool,
    /// Log file path (default: bt-takeover.log)
    log_file: PathBuf,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            command: Command::Takeover,
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            id: None,
            file: None,
            gain: None,
            no_loop: false,
            takeover: false,
            simulate: false,
            debug: false,
            log_file: PathBuf::from("bt-takeover.log"),
        }
    }
}

fn parse_args() -> Args {
    match parse_args_from(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_args_from(argv: impl IntoIterator<Item = String>) -> std::result::Result<Args, String> {
    let mut args = Args::default();
    let mut iter = argv.into_iter();
    let mut command_seen = false;

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| format!("Missing value for {}", name))
        };
        match arg.as_str() {
            "--config" | "-c" => args.config = PathBuf::from(value("--config")?),
            "--id" | "-i" => args.id = Some(value("--id")?),
            "--file" | "-f" => args.file = Some(PathBuf::from(value("--file")?)),
            "--gain" | "-g" => {
                let raw = value("--gain")?;
                args.gain = Some(raw.parse().map_err(|_| format!("Invalid gain: {}", raw))?);
            }
            "--no-loop" => args.no_loop = true,
            "--takeover" | "-t" => args.takeover = true,
            "--simulate" | "-s" => args.simulate = true,
            "--debug" | "-d" => args.debug = true,
            "--log-file" | "-l" => args.log_file = PathBuf::from(value("--log-file")?),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if !command_seen && !other.starts_with('-') => {
                args.command = match other {
                    "takeover" => Command::Takeover,
                    "watch" => Command::Watch,
                    "play" => Command::Play,
                    "devices" => Command::Devices,
                    "status" => Command::Status,
                    _ => return Err(format!("Unknown command: {}", other)),
                };
                command_seen = true;
            }
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    Ok(args)
}

fn print_help() {
    println!("bt-takeover - take over a Bluetooth speaker and play audio through it");
    println!();
    println!("Usage: bt-takeover [COMMAND] [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  takeover             Locate, pair, connect and play (default)");
    println!("  watch                Wait until the device is in range, then alarm");
    println!("  play                 Play the configured audio locally");
    println!("  devices              List paired devices");
    println!("  status               Show the device's profile connections");
    println!();
    println!("Options:");
    println!("  -c, --config PATH    Preferences file (default: {})", DEFAULT_CONFIG_FILE);
    println!("  -i, --id ID          Device address or name fragment");
    println!("  -f, --file PATH      Play an audio file instead of noise");
    println!("  -g, --gain GAIN      Linear gain, above 1.0 overdrives");
    println!("      --no-loop        Play the source once");
    println!("  -t, --takeover       With watch: take the device over once found");
    println!("  -s, --simulate       Use a simulated adapter and silent output");
    println!("  -d, --debug          Enable debug logging to file");
    println!("  -l, --log-file PATH  Set log file path (default: bt-takeover.log)");
    println!("  -h, --help           Show this help message");
}

fn setup_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if !args.debug {
        // Progress goes to stdout; only problems reach stderr.
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_max_level(tracing::Level::WARN)
            .init();
        return None;
    }

    let file = std::fs::File::create(&args.log_file).ok()?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Debug logging enabled, writing to: {:?}", args.log_file);

    Some(guard)
}

/// Fold command-line overrides into the loaded preferences.
fn apply_overrides(loaded: &mut LoadedPreferences, args: &Args) {
    let prefs = &mut loaded.preferences;
    if let Some(id) = &args.id {
        prefs.bluetooth_id = Some(id.clone());
    }
    if let Some(file) = &args.file {
        prefs.mode = AudioMode::File;
        prefs.audio_file = Some(file.clone());
    }
    if let Some(gain) = args.gain {
        prefs.gain = gain;
    }
    if args.no_loop {
        prefs.looping = false;
    }
}

/// A scripted adapter with the requested device nearby and a stranger
/// holding its media profile.
fn simulated_adapter(identifier: Option<&DeviceIdentifier>) -> SimulatedAdapter {
    let adapter = SimulatedAdapter::new();
    adapter.add_bonded(DiscoveredDevice::new(
        Address([0x5C, 0xF3, 0x70, 0x8B, 0x12, 0x01]),
        Some("Living Room".to_string()),
    ));
    let target = match identifier {
        Some(DeviceIdentifier::HardwareAddress(address)) => {
            DiscoveredDevice::new(*address, Some("Simulated Speaker".to_string()))
        }
        Some(DeviceIdentifier::NameFragment(name)) => {
            DiscoveredDevice::new(Address([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]), Some(name.clone()))
        }
        None => return adapter,
    };
    adapter.add_sighting(Duration::from_secs(2), target);
    if let Some(media) = adapter.profile(ProfileKind::Media) {
        media.add_connected(Address([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
    }
    adapter
}

#[cfg(feature = "bluez")]
async fn system_adapter() -> Result<Arc<dyn SystemAdapter>> {
    let adapter = takeover_bluetooth::BluezAdapter::new()
        .await
        .context("opening the Bluetooth adapter")?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "bluez"))]
async fn system_adapter() -> Result<Arc<dyn SystemAdapter>> {
    anyhow::bail!("built without Bluetooth support; rebuild with --features bluez or pass --simulate")
}

async fn open_adapter(args: &Args, identifier: Option<&DeviceIdentifier>) -> Result<Arc<dyn SystemAdapter>> {
    if args.simulate {
        return Ok(Arc::new(simulated_adapter(identifier)));
    }
    system_adapter().await
}

#[cfg(feature = "cpal-output")]
fn sink_factory(simulate: bool) -> Arc<dyn SinkFactory> {
    if simulate {
        Arc::new(takeover_audio::NullSinkFactory::new())
    } else {
        Arc::new(takeover_audio::CpalSinkFactory)
    }
}

#[cfg(not(feature = "cpal-output"))]
fn sink_factory(simulate: bool) -> Arc<dyn SinkFactory> {
    if !simulate {
        tracing::warn!("Built without audio output; playback is silent");
    }
    Arc::new(takeover_audio::NullSinkFactory::new())
}

fn build_engine(args: &Args) -> Arc<AudioEngine> {
    let volume: Arc<dyn VolumeControl> = if args.simulate {
        Arc::new(NoopVolume)
    } else {
        Arc::new(PactlVolume)
    };
    Arc::new(AudioEngine::new(sink_factory(args.simulate), volume))
}

fn print_event(event: TakeoverEvent) {
    match event {
        TakeoverEvent::Status(status) => println!("{}", status),
        TakeoverEvent::PlaybackFailed(reason) => println!("Audio did not start: {}", reason),
        TakeoverEvent::SilenceAlerts => println!("Presence alerts silenced"),
        TakeoverEvent::Finished(outcome) => println!("{}", outcome),
        _ => {}
    }
}

/// Block until playback ends on its own or the user interrupts.
async fn hold_playback(handle: PlaybackHandle) -> Result<()> {
    println!("Playing. Press Ctrl-C to stop.");
    let finished = tokio::task::spawn_blocking(move || handle.wait());
    tokio::select! {
        state = finished => {
            let state = state.context("waiting for playback")?;
            info!("Playback ended: {:?}", state);
        }
        _ = tokio::signal::ctrl_c() => println!("Stopping"),
    }
    Ok(())
}

/// What a takeover run starts from.
enum Target {
    Search(TakeoverRequest),
    Device(DiscoveredDevice),
}

async fn run_takeover(args: &Args, loaded: &LoadedPreferences) -> Result<bool> {
    let request = loaded
        .preferences
        .to_request()
        .context("no device given; use --id or set bluetooth_id")?;
    let adapter = open_adapter(args, Some(&request.identifier)).await?;
    take_over(args, loaded, adapter, Target::Search(request), None).await
}

/// Run one takeover and hold its playback. A successful run silences `alarm`
/// when auto-silence is on.
async fn take_over(
    args: &Args,
    loaded: &LoadedPreferences,
    adapter: Arc<dyn SystemAdapter>,
    target: Target,
    alarm: Option<&PresenceAlarm>,
) -> Result<bool> {
    let prefs = &loaded.preferences;
    let job = prefs.audio_job(loaded.base_dir.as_deref())?;

    let printer = CallbackHandler::new(print_event);
    let mut builder = OrchestratorBuilder::new(Arc::clone(&adapter))
        .engine(build_engine(args))
        .audio_job(job)
        .auto_silence(prefs.auto_silence);
    builder = match alarm {
        Some(alarm) => builder.event_handler(alarm.silencing(printer)),
        None => builder.event_handler(printer),
    };
    if std::io::stdin().is_terminal() {
        builder = builder.fallback(PromptPicker::new(Arc::clone(&adapter)));
    }
    let orchestrator: Arc<TakeoverOrchestrator> = builder.build()?;

    let mut run = match target {
        Target::Search(request) => orchestrator.submit(request)?,
        Target::Device(device) => orchestrator.takeover_with_device(device)?,
    };
    let outcome = tokio::select! {
        outcome = &mut run => outcome?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel();
            run.await?
        }
    };

    if let Some(handle) = orchestrator.playback() {
        hold_playback(handle).await?;
        orchestrator.stop_audio();
    }
    orchestrator.release_profiles().await;

    Ok(outcome.is_success())
}

async fn run_watch(args: &Args, loaded: &LoadedPreferences) -> Result<bool> {
    let request = loaded
        .preferences
        .to_request()
        .context("no device given; use --id or set bluetooth_id")?;
    let adapter = open_adapter(args, Some(&request.identifier)).await?;

    println!("Watching for {}. Press Ctrl-C to stop.", request.identifier);
    let mut watch = PresenceWatcher::spawn(Arc::clone(&adapter), request.identifier);
    let found = tokio::select! {
        found = watch.found() => found,
        _ = tokio::signal::ctrl_c() => None,
    };
    watch.stop();

    let Some(device) = found else {
        return Ok(false);
    };
    println!("{} is in range", device);

    // Beeps get their own engine so they never replace the takeover's audio.
    let alarm = PresenceAlarm::start(
        Arc::new(EngineBeep::new(build_engine(args))),
        DEFAULT_ALERT_PERIOD,
    );
    let succeeded = if args.takeover {
        println!("Taking over {}", device);
        take_over(args, loaded, adapter, Target::Device(device), Some(&alarm)).await
    } else {
        println!("Press Ctrl-C to silence.");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")
            .map(|_| true)
    };

    alarm.silence();
    info!("Alarm sounded {} times", alarm.finished().await);
    succeeded
}

async fn run_play(args: &Args, loaded: &LoadedPreferences) -> Result<bool> {
    let job = loaded
        .preferences
        .audio_job(loaded.base_dir.as_deref())?;
    let engine = build_engine(args);

    let handle = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.start(job)).await??
    };
    hold_playback(handle.clone()).await?;
    engine.stop(&handle);
    Ok(true)
}

async fn run_devices(args: &Args) -> Result<bool> {
    let adapter = open_adapter(args, None).await?;
    let devices = DeviceLocator::new(adapter).bonded_devices().await?;
    if devices.is_empty() {
        println!("No paired devices");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(true)
}

async fn run_status(args: &Args, loaded: &LoadedPreferences) -> Result<bool> {
    let request = loaded
        .preferences
        .to_request()
        .context("no device given; use --id or set bluetooth_id")?;
    let adapter = open_adapter(args, Some(&request.identifier)).await?;

    let locator = DeviceLocator::new(Arc::clone(&adapter));
    let device = locator
        .locate(&request.identifier, request.discovery_timeout, &CancellationToken::new())
        .await?;
    let Some(device) = device else {
        println!("{} not found", request.identifier);
        return Ok(false);
    };

    let registry = ProfileRegistry::new(adapter);
    let negotiator = ProfileNegotiator::default();
    let mut any = false;
    for kind in ProfileKind::ALL {
        match registry.get(kind).await {
            Ok(profile) => {
                let connected = negotiator.verify_connected(profile.as_ref(), &device.address).await;
                any |= connected;
                println!(
                    "{} {}: {}",
                    device,
                    kind,
                    if connected { "connected" } else { "not connected" }
                );
            }
            Err(e) => println!("{} {}: unavailable ({})", device, kind, e),
        }
    }
    Ok(any)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Setup logging before anything else
    let _guard = setup_logging(&args);

    let mut loaded = load_preferences(&args.config)?;
    apply_overrides(&mut loaded, &args);

    let succeeded = match args.command {
        Command::Takeover => run_takeover(&args, &loaded).await,
        Command::Watch => run_watch(&args, &loaded).await,
        Command::Play => run_play(&args, &loaded).await,
        Command::Devices => run_devices(&args).await,
        Command::Status => run_status(&args, &loaded).await,
    };

    match succeeded {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> std::result::Result<Args, String> {
        parse_args_from(argv.iter().map(|s| s.to_string()))
    }

    mod arguments {
        use super::*;

        #[test]
        fn defaults_to_takeover() {
            let args = parse(&[]).unwrap();
            assert_eq!(args.command, Command::Takeover);
            assert_eq!(args.config, PathBuf::from("bt-takeover.json"));
            assert!(!args.simulate);
        }

        #[test]
        fn command_and_options() {
            let args = parse(&["watch", "--id", "MySpeaker", "-s", "--gain", "2.5"]).unwrap();
            assert_eq!(args.command, Command::Watch);
            assert_eq!(args.id.as_deref(), Some("MySpeaker"));
            assert!(args.simulate);
            assert_eq!(args.gain, Some(2.5));
        }

        #[test]
        fn rejects_unknown_and_incomplete() {
            assert!(parse(&["explode"]).is_err());
            assert!(parse(&["--id"]).is_err());
            assert!(parse(&["--gain", "loud"]).is_err());
            assert!(parse(&["play", "watch"]).is_err());
        }
    }

    mod overrides {
        use super::*;
        use takeover_core::{AudioSourceKind, Preferences};

        #[test]
        fn command_line_wins() {
            let mut loaded = LoadedPreferences {
                preferences: Preferences {
                    bluetooth_id: Some("Old".to_string()),
                    ..Default::default()
                },
                base_dir: None,
            };
            let args = parse(&["--id", "New", "--file", "/tmp/a.mp3", "--no-loop"]).unwrap();

            apply_overrides(&mut loaded, &args);

            let prefs = &loaded.preferences;
            assert_eq!(prefs.bluetooth_id.as_deref(), Some("New"));
            let job = prefs.audio_job(None).unwrap();
            assert_eq!(job.source, AudioSourceKind::FileStream("/tmp/a.mp3".into()));
            assert!(!job.looping);
        }
    }

    mod simulation {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use takeover_client::{AlertSound, TakeoverOutcome};
        use takeover_core::Preferences;

        #[derive(Default)]
        struct Beeps(AtomicUsize);

        impl AlertSound for Beeps {
            fn sound(&self) -> takeover_client::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[tokio::test(start_paused = true)]
        async fn chained_takeover_silences_watch_alarm() {
            let args = parse(&["watch", "--takeover", "-s", "--no-loop"]).unwrap();
            let loaded = LoadedPreferences {
                preferences: Preferences {
                    bluetooth_id: Some("Demo".to_string()),
                    looping: false,
                    auto_silence: true,
                    ..Default::default()
                },
                base_dir: None,
            };
            let identifier = DeviceIdentifier::parse("Demo").unwrap();
            let adapter: Arc<dyn SystemAdapter> = Arc::new(simulated_adapter(Some(&identifier)));
            let device = DeviceLocator::new(Arc::clone(&adapter))
                .scan_live(&identifier, Some(Duration::from_secs(5)), &CancellationToken::new())
                .await
                .unwrap()
                .expect("demo device sighted");

            let beeps = Arc::new(Beeps::default());
            let alarm = PresenceAlarm::start(beeps.clone(), DEFAULT_ALERT_PERIOD);
            tokio::time::sleep(Duration::from_millis(1500)).await;

            let succeeded = take_over(&args, &loaded, adapter, Target::Device(device), Some(&alarm))
                .await
                .unwrap();

            assert!(succeeded);
            assert!(alarm.is_silenced());
            let sounded = alarm.finished().await;
            assert!(sounded >= 2);
            assert_eq!(beeps.0.load(Ordering::SeqCst), sounded);
        }

        #[tokio::test(start_paused = true)]
        async fn simulated_takeover_succeeds() {
            let identifier = DeviceIdentifier::parse("Demo").unwrap();
            let adapter: Arc<dyn SystemAdapter> = Arc::new(simulated_adapter(Some(&identifier)));
            let orchestrator = OrchestratorBuilder::new(adapter)
                .engine(Arc::new(AudioEngine::new(
                    Arc::new(takeover_audio::NullSinkFactory::unpaced()),
                    Arc::new(NoopVolume),
                )))
                .build()
                .unwrap();

            let outcome = orchestrator
                .submit(takeover_core::TakeoverRequest::new(identifier))
                .unwrap()
                .await
                .unwrap();
            orchestrator.stop_audio();

            assert!(matches!(outcome, TakeoverOutcome::Success(_)));
        }
    }
}
