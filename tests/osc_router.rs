//! Router-level policy tests over a live UDP socket: load-before-play,
//! missing-file cues, EQ-disabled fast path, unknown verbs, status replies.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use rosc::{OscMessage, OscPacket, OscType};

use stemdeck::audio::commands::{EngineCommand, command_channel};
use stemdeck::audio::tempo::{MovementBpmConfig, TempoGovernor};
use stemdeck::audio::types::{DeckLabel, EngineShared};
use stemdeck::osc::handlers::ControlState;
use stemdeck::osc::server;

struct Rig {
    client: std::net::UdpSocket,
    server_addr: SocketAddr,
    shared: Arc<EngineShared>,
    commands: rtrb::Consumer<EngineCommand>,
}

impl Rig {
    fn new(filters_enabled: bool) -> Self {
        let shared = Arc::new(EngineShared::new(44100, 1.0, filters_enabled));
        let (tx, rx) = command_channel();
        let governor = TempoGovernor::new(MovementBpmConfig::default(), 120.0, shared.clone());
        let state = ControlState::new(tx, shared.clone(), governor);

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(socket.local_addr().unwrap()).unwrap();
                server::run(socket, state).await;
            });
        });
        let server_addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            client,
            server_addr,
            shared,
            commands: rx,
        }
    }

    fn send(&self, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        self.client.send_to(&bytes, self.server_addr).unwrap();
    }

    /// Round-trip through /get_status: once the reply lands, every message
    /// sent before it has been dispatched.
    fn barrier(&self) -> Vec<OscType> {
        self.send("/get_status", vec![]);
        let mut buf = [0u8; 2048];
        let (len, _) = self.client.recv_from(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
        match packet {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/status.reply");
                msg.args
            }
            OscPacket::Bundle(_) => panic!("unexpected bundle reply"),
        }
    }

    /// Pop queued engine commands until one matches, or time out.
    fn wait_for_command<F: Fn(&EngineCommand) -> bool>(&mut self, want: F, timeout: Duration) -> Option<EngineCommand> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            while let Ok(command) = self.commands.pop() {
                if want(&command) {
                    return Some(command);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    fn assert_no_commands(&mut self, settle: Duration) {
        std::thread::sleep(settle);
        assert!(self.commands.pop().is_err(), "unexpected engine command queued");
    }
}

fn write_wav(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let s = 0.4 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin();
        writer.write_sample(s).unwrap();
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn status_reply_reports_buffers_and_tempo() {
    let rig = Rig::new(false);
    let args = rig.barrier();
    // buffer count, four deck phases, bpm, ratio, movement.
    assert_eq!(args.len(), 8);
    assert_eq!(args[0], OscType::Int(0));
    assert_eq!(args[5], OscType::Float(120.0));
    assert_eq!(args[6], OscType::Float(1.0));
}

#[test]
fn unknown_verbs_are_ignored_and_router_survives() {
    let rig = Rig::new(false);
    rig.send("/definitely_not_a_verb", vec![OscType::Int(1)]);
    rig.send("/definitely_not_a_verb", vec![OscType::Int(2)]);
    rig.send("/another_unknown", vec![]);
    // Router still answers afterwards.
    let args = rig.barrier();
    assert_eq!(args[0], OscType::Int(0));
}

#[test]
fn cue_of_missing_file_changes_nothing() {
    let mut rig = Rig::new(false);
    rig.send(
        "/cue",
        vec![
            OscType::String("A".into()),
            OscType::String("/no/such.wav".into()),
            OscType::Float(0.0),
        ],
    );
    rig.barrier();
    // Load-before-play: the play for the would-be id is ignored too.
    rig.send(
        "/play_stem",
        vec![
            OscType::Int(100),
            OscType::Float(1.0),
            OscType::Float(1.0),
            OscType::Int(0),
            OscType::Float(0.0),
        ],
    );
    rig.barrier();
    rig.assert_no_commands(Duration::from_millis(100));
}

#[test]
fn cue_then_group_start_commits_cue_and_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stem.wav");
    write_wav(&path, 22050);

    let mut rig = Rig::new(false);
    rig.send(
        "/cue",
        vec![
            OscType::String("A".into()),
            OscType::String(path.display().to_string()),
            OscType::Float(0.0),
        ],
    );
    rig.send(
        "/start_group",
        vec![OscType::Float(0.25), OscType::String("A".into())],
    );
    let cue = rig.wait_for_command(
        |c| matches!(c, EngineCommand::Cue { deck: DeckLabel::A, .. }),
        Duration::from_secs(5),
    );
    assert!(cue.is_some(), "no cue command reached the engine queue");
    let start = rig.wait_for_command(
        |c| matches!(c, EngineCommand::StartGroup { deck: DeckLabel::A, .. }),
        Duration::from_secs(5),
    );
    match start {
        Some(EngineCommand::StartGroup { start_frame, .. }) => {
            // 0.25 s of engine time at 44.1 kHz; the engine clock is frozen
            // in this rig, so the frame is exact.
            assert_eq!(start_frame, 11025);
        }
        _ => panic!("no group start command reached the engine queue"),
    }
}

#[test]
fn play_stem_sets_params_and_clamps_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stem.wav");
    write_wav(&path, 22050);

    let mut rig = Rig::new(false);
    rig.send(
        "/cue",
        vec![
            OscType::String("B".into()),
            OscType::String(path.display().to_string()),
            OscType::Float(0.0),
        ],
    );
    // The first implicit id on deck B.
    let id = DeckLabel::B.base_buffer_id() as i32;
    // Retry until the background decode lands; an unloaded buffer makes
    // play_stem a logged no-op.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut played = None;
    while Instant::now() < deadline && played.is_none() {
        rig.send(
            "/play_stem",
            vec![
                OscType::Int(id),
                OscType::Float(9.0),
                OscType::Float(2.0),
                OscType::Int(1),
                OscType::Float(0.0),
            ],
        );
        played = rig.wait_for_command(
            |c| matches!(c, EngineCommand::Play { deck: DeckLabel::B, .. }),
            Duration::from_millis(200),
        );
    }
    let played = played.expect("play never reached the engine queue");
    match played {
        EngineCommand::Play { params, .. } => assert!(params.looping),
        _ => unreachable!(),
    }
    // Out-of-range inputs were clamped on the way in.
    let deck = rig.shared.deck(DeckLabel::B);
    assert_eq!(deck.rate.load(Ordering::Relaxed), 4.0);
    assert_eq!(deck.volume.load(Ordering::Relaxed), 1.0);
}

#[test]
fn play_stem_with_unbound_id_is_rejected() {
    let mut rig = Rig::new(false);
    rig.send(
        "/play_stem",
        vec![
            OscType::Int(4242),
            OscType::Float(1.0),
            OscType::Float(1.0),
            OscType::Int(0),
            OscType::Float(0.0),
        ],
    );
    rig.barrier();
    rig.assert_no_commands(Duration::from_millis(100));
}

#[test]
fn crossfade_levels_update_weights() {
    let rig = Rig::new(false);
    rig.send(
        "/crossfade_levels",
        vec![OscType::Float(1.0), OscType::Float(0.25)],
    );
    rig.barrier();
    assert_eq!(rig.shared.deck(DeckLabel::A).weight.load(Ordering::Relaxed), 1.0);
    assert_eq!(rig.shared.deck(DeckLabel::B).weight.load(Ordering::Relaxed), 0.25);
    // Unsupplied decks keep their previous weights.
    assert_eq!(rig.shared.deck(DeckLabel::C).weight.load(Ordering::Relaxed), 1.0);
}

#[test]
fn deck_eq_is_inert_when_filters_disabled() {
    let rig = Rig::new(false);
    for _ in 0..500 {
        rig.send(
            "/deck_eq",
            vec![
                OscType::String("A".into()),
                OscType::String("low".into()),
                OscType::Float(0.0),
            ],
        );
    }
    let started = Instant::now();
    rig.barrier();
    // The disabled path returns before parsing; the burst costs nothing and
    // the EQ cells never move.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(rig.shared.deck(DeckLabel::A).eq_low.load(Ordering::Relaxed), 1.0);
}

#[test]
fn deck_eq_applies_percent_curve_when_enabled() {
    let rig = Rig::new(true);
    rig.send(
        "/deck_eq",
        vec![
            OscType::String("A".into()),
            OscType::String("low".into()),
            OscType::Float(50.0),
        ],
    );
    rig.send(
        "/deck_eq_all",
        vec![
            OscType::String("B".into()),
            OscType::Float(0.0),
            OscType::Float(100.0),
            OscType::Float(25.0),
        ],
    );
    rig.barrier();
    assert_eq!(rig.shared.deck(DeckLabel::A).eq_low.load(Ordering::Relaxed), 0.5);
    let b = rig.shared.deck(DeckLabel::B);
    assert_eq!(b.eq_low.load(Ordering::Relaxed), 0.0);
    assert_eq!(b.eq_mid.load(Ordering::Relaxed), 1.0);
    assert_eq!(b.eq_high.load(Ordering::Relaxed), 0.25);
}

#[test]
fn set_tempo_and_dance_drive_tempo_ratio() {
    let rig = Rig::new(false);
    rig.send("/set_tempo", vec![OscType::Float(150.0)]);
    rig.barrier();
    assert!((rig.shared.tempo_ratio.load(Ordering::Relaxed) - 1.25).abs() < 1e-6);

    // Movement resumes automatic governance: stillness pulls back down.
    for _ in 0..200 {
        rig.send("/dance/arms", vec![OscType::Float(0.0)]);
    }
    rig.barrier();
    assert!(rig.shared.tempo_ratio.load(Ordering::Relaxed) < 1.25);
}

#[test]
fn mixer_cleanup_stops_all_and_frees_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stem.wav");
    write_wav(&path, 22050);

    let mut rig = Rig::new(false);
    rig.send(
        "/load_buffer",
        vec![
            OscType::Int(7),
            OscType::String(path.display().to_string()),
            OscType::String("seven".into()),
        ],
    );
    let args = rig.barrier();
    assert_eq!(args[0], OscType::Int(1), "buffer did not load");

    rig.send("/mixer_cleanup", vec![]);
    let args = rig.barrier();
    assert_eq!(args[0], OscType::Int(0), "cleanup left buffers behind");
    assert!(
        rig.wait_for_command(|c| matches!(c, EngineCommand::StopAll), Duration::from_secs(2))
            .is_some()
    );
}

#[test]
fn free_buffer_unbinds_playing_deck_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stem.wav");
    write_wav(&path, 22050);

    let mut rig = Rig::new(false);
    rig.send(
        "/cue",
        vec![
            OscType::String("C".into()),
            OscType::String(path.display().to_string()),
            OscType::Float(0.0),
        ],
    );
    rig.barrier();
    let id = DeckLabel::C.base_buffer_id() as i32;
    // Wait for the decode to settle via a bounded group start.
    rig.send(
        "/start_group",
        vec![OscType::Float(0.0), OscType::String("C".into())],
    );
    assert!(
        rig.wait_for_command(
            |c| matches!(c, EngineCommand::Cue { deck: DeckLabel::C, .. }),
            Duration::from_secs(5)
        )
        .is_some()
    );
    rig.send("/free_buffer", vec![OscType::Int(id)]);
    assert!(
        rig.wait_for_command(
            |c| matches!(c, EngineCommand::Unbind { deck: DeckLabel::C }),
            Duration::from_secs(2)
        )
        .is_some(),
        "free_buffer did not force the deck idle"
    );
}
