use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use stemdeck::audio::commands::command_channel;
use stemdeck::audio::filter::FilterBackend;
use stemdeck::audio::mixer::MixerEngine;
use stemdeck::audio::output;
use stemdeck::audio::tempo::{MovementBpmConfig, TempoGovernor, load_tempo_config};
use stemdeck::audio::types::{DeckLabel, EngineShared};
use stemdeck::cli::{Cli, StretchMethod};
use stemdeck::osc::handlers::ControlState;
use stemdeck::osc::server;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.stretch_method != StretchMethod::PlaybackRate {
        log::warn!(
            "Main: Stretch method {:?} is not available in this build; falling back to playback_rate",
            cli.stretch_method
        );
    }

    let tempo_config = match &cli.bpm_config {
        Some(path) => match load_tempo_config(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Main: {}", e);
                return ExitCode::from(2);
            }
        },
        None => MovementBpmConfig::default(),
    };

    // Device probe happens before the OSC socket exists; clients are expected
    // to tolerate a few seconds of startup before commands are accepted.
    let (device, negotiated) = match output::open_device(cli.device) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("Main: {}", e);
            return ExitCode::from(1);
        }
    };

    let shared = Arc::new(EngineShared::new(
        negotiated.sample_rate,
        cli.master_volume,
        cli.enable_filters,
    ));
    let (command_tx, command_rx) = command_channel();

    let backend = if cli.optimized_filters {
        FilterBackend::Block
    } else {
        FilterBackend::SampleLoop
    };
    if cli.enable_filters {
        log::info!("Main: EQ filters enabled ({:?} backend)", backend);
    } else {
        log::info!("Main: EQ filters disabled");
    }

    let engine = match MixerEngine::new(shared.clone(), command_rx, backend) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Main: Failed to build mixer: {}", e);
            return ExitCode::from(1);
        }
    };
    let stream = match output::start_stream(&device, negotiated, cli.buffer_size, engine) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Main: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Main: Failed to build control runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    let exit = runtime.block_on(async {
        // Bind the wildcard IPv4 interface explicitly. Clients must target an
        // IPv4 loopback literal; a hostname that resolves to ::1 never
        // reaches this socket.
        let socket = match tokio::net::UdpSocket::bind(("0.0.0.0", cli.port)).await {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("Main: Failed to bind OSC port {}: {}", cli.port, e);
                return ExitCode::from(2);
            }
        };

        let governor = TempoGovernor::new(tempo_config, cli.bpm, shared.clone());
        let mut state = ControlState::new(command_tx, shared.clone(), governor);

        let mut preloads = Vec::new();
        if let Some(path) = &cli.a {
            preloads.push((DeckLabel::A, path.clone()));
        }
        if let Some(path) = &cli.b {
            preloads.push((DeckLabel::B, path.clone()));
        }
        state.preload(preloads);

        tokio::select! {
            _ = server::run(socket, state) => ExitCode::SUCCESS,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Main: Interrupted, shutting down");
                ExitCode::SUCCESS
            }
        }
    });

    drop(stream);
    exit
}
