use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use mirrorsink::backend::GstEngine;
use mirrorsink::config::{SessionConfig, app_name, version};
use mirrorsink::forward::FrameForwarder;
use mirrorsink::pipeline::stage::spawn_stage;
use mirrorsink::pipeline::{InstanceId, SessionHealth};
use mirrorsink::session::VideoSession;
use mirrorsink::workers::WorkerClose;
use mirrorsink::workers::replay::{ReplayOptions, ReplayReader, ReplayWorker};

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON session configuration; command line options override it."),
        )
        .arg(
            Arg::new("uri")
                .long("uri")
                .value_name("URI")
                .help("Play this URI on demand instead of rendering a mirror stream."),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Captured mirror stream to replay."),
        )
        .arg(
            Arg::new("no-pacing")
                .long("no-pacing")
                .action(ArgAction::SetTrue)
                .help("Replay records as fast as possible."),
        )
        .arg(
            Arg::new("h265")
                .long("h265")
                .action(ArgAction::SetTrue)
                .help("Also build the h265 pipeline."),
        )
        .arg(Arg::new("parser").long("parser").value_name("ELEMENT").help("Stream parser element."))
        .arg(Arg::new("decoder").long("decoder").value_name("ELEMENT").help("Video decoder element."))
        .arg(Arg::new("converter").long("converter").value_name("ELEMENT").help("Video converter element."))
        .arg(
            Arg::new("sink")
                .short('s')
                .long("sink")
                .value_name("ELEMENT")
                .help("Video sink element."),
        )
        .arg(
            Arg::new("sink-options")
                .long("sink-options")
                .value_name("OPTIONS")
                .allow_hyphen_values(true)
                .help("Whitespace separated key=value properties of the video sink."),
        )
        .arg(
            Arg::new("flip")
                .long("flip")
                .value_name("FLIP")
                .help("none, invert, hflip or vflip."),
        )
        .arg(
            Arg::new("rotate")
                .long("rotate")
                .value_name("ROTATION")
                .help("none, left or right."),
        )
        .arg(
            Arg::new("no-sync")
                .long("no-sync")
                .action(ArgAction::SetTrue)
                .help("Push frames without presentation times."),
        )
        .arg(
            Arg::new("fullscreen")
                .short('f')
                .long("fullscreen")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("forward-url")
                .long("forward-url")
                .value_name("URL")
                .help("Websocket endpoint receiving decoded frames."),
        )
        .arg(
            Arg::new("no-forward")
                .long("no-forward")
                .action(ArgAction::SetTrue)
                .help("Do not forward decoded frames."),
        )
        .arg(
            Arg::new("debug-bus")
                .short('d')
                .long("debug-bus")
                .action(ArgAction::SetTrue)
                .help("Log every bus message."),
        )
}

fn session_config(matches: &ArgMatches) -> anyhow::Result<SessionConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SessionConfig::from_json_file(path).with_context(|| format!("reading {path}"))?,
        None => SessionConfig::default(),
    };

    let text = |name: &str| matches.get_one::<String>(name).cloned();

    if let Some(uri) = text("uri") {
        config.uri = Some(uri);
    }
    if let Some(parser) = text("parser") {
        config.parser = parser;
    }
    if let Some(decoder) = text("decoder") {
        config.decoder = decoder;
    }
    if let Some(converter) = text("converter") {
        config.converter = converter;
    }
    if let Some(sink) = text("sink") {
        config.video_sink = sink;
    }
    if let Some(options) = text("sink-options") {
        config.sink_options = options;
    }
    if let Some(flip) = text("flip") {
        config.flip = flip.parse()?;
    }
    if let Some(rotation) = text("rotate") {
        config.rotation = rotation.parse()?;
    }
    if let Some(url) = text("forward-url") {
        config.forward.url = url;
    }

    config.h265_support |= matches.get_flag("h265");
    config.fullscreen |= matches.get_flag("fullscreen");
    config.debug_bus |= matches.get_flag("debug-bus");
    if matches.get_flag("no-sync") {
        config.sync = false;
    }
    if matches.get_flag("no-forward") {
        config.forward.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let config = session_config(&matches)?;

    let health = Arc::new(SessionHealth::new());
    let (forwarder, forward_service) = FrameForwarder::channel(config.forward.url.clone(), health);
    let forward_shutdown = forward_service.shutdown_token();
    let forward_task = config.forward.enabled.then(|| spawn_stage(forward_service));

    let engine = GstEngine::new(&config)?;
    let session = VideoSession::init(config.clone(), &engine, &forwarder)?;

    let mut watches = Vec::with_capacity(session.instance_count());
    for index in 0..session.instance_count() {
        watches.push(session.register_bus_watch(InstanceId(index))?);
    }

    // leave the dispatch loop on Ctrl-C
    let quit = session.quit_signal();
    ctrlc::set_handler(move || {
        quit.cancel();
    })
    .context("installing the Ctrl-C handler")?;

    session.start()?;

    let dispatch = session
        .dispatch_loop()
        .ok_or_else(|| anyhow!("dispatch loop already running"))?;
    let dispatch = spawn_stage(dispatch);

    let mut replay = match matches.get_one::<String>("input") {
        Some(path) if config.is_on_demand() => {
            warn!("Ignoring {}: replay needs mirror mode", path);
            None
        }
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {path}"))?;
            let options = ReplayOptions {
                pacing: !matches.get_flag("no-pacing"),
                ..Default::default()
            };
            info!("Replaying {}", path);
            Some(ReplayWorker::spawn(
                session.clone(),
                ReplayReader::new(BufReader::new(file)),
                options,
            ))
        }
        None => None,
    };

    if let Err(e) = dispatch.await {
        error!("Dispatch loop aborted: {}", e);
    }

    if let Some(worker) = replay.as_mut() {
        worker.close();
    }
    if let Err(e) = session.stop() {
        warn!("Stopping the renderer: {}", e);
    }
    drop(watches);
    session.destroy();

    forward_shutdown.cancel();
    if let Some(task) = forward_task {
        let _ = task.await;
    }

    info!("{}", session.health().summary());
    Ok(())
}
