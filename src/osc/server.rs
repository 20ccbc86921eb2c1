use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;

use lazy_static::lazy_static;
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;

use crate::audio::tempo::MovementPart;
use crate::audio::types::{DeckLabel, EqBand};

use super::handlers::ControlState;

lazy_static! {
    /// Verbs we have already complained about; unknown addresses and
    /// malformed argument lists are logged once each, then ignored.
    static ref UNKNOWN_ADDRS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
    static ref BAD_ARG_ADDRS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

fn log_unknown_once(addr: &str) {
    let mut seen = UNKNOWN_ADDRS.lock().unwrap();
    if seen.insert(addr.to_string()) {
        log::warn!("OSC: Unknown address '{}', ignoring (logged once)", addr);
    }
}

fn log_bad_args_once(addr: &str) {
    let mut seen = BAD_ARG_ADDRS.lock().unwrap();
    if seen.insert(addr.to_string()) {
        log::warn!(
            "OSC: Bad argument arity/type for '{}', ignoring (logged once)",
            addr
        );
    }
}

// --- Argument coercion ---
// Clients are sloppy about int/float typing, so numeric args accept both.

fn arg_i32(msg: &OscMessage, index: usize) -> Option<i32> {
    match msg.args.get(index) {
        Some(OscType::Int(v)) => Some(*v),
        Some(OscType::Long(v)) => Some(*v as i32),
        Some(OscType::Float(v)) => Some(*v as i32),
        Some(OscType::Double(v)) => Some(*v as i32),
        _ => None,
    }
}

fn arg_f32(msg: &OscMessage, index: usize) -> Option<f32> {
    match msg.args.get(index) {
        Some(OscType::Float(v)) => Some(*v),
        Some(OscType::Double(v)) => Some(*v as f32),
        Some(OscType::Int(v)) => Some(*v as f32),
        Some(OscType::Long(v)) => Some(*v as f32),
        _ => None,
    }
}

fn arg_f64(msg: &OscMessage, index: usize) -> Option<f64> {
    arg_f32(msg, index).map(f64::from)
}

fn arg_str<'a>(msg: &'a OscMessage, index: usize) -> Option<&'a str> {
    match msg.args.get(index) {
        Some(OscType::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn arg_deck(msg: &OscMessage, index: usize) -> Option<DeckLabel> {
    arg_str(msg, index).and_then(DeckLabel::parse)
}

/// Serve OSC forever on `socket`. The router task owns all control state;
/// only the command queue and the atomic cells cross into the audio context.
pub async fn run(socket: UdpSocket, mut state: ControlState) {
    log::info!(
        "OSC: Listening on {}",
        socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into())
    );
    let mut buf = [0u8; 8192];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("OSC: recv error: {}", e);
                continue;
            }
        };
        match rosc::decoder::decode_udp(&buf[..len]) {
            Ok((_, packet)) => handle_packet(packet, peer, &socket, &mut state).await,
            Err(e) => {
                log::warn!("OSC: Undecodable packet from {}: {:?}", peer, e);
            }
        }
        state.settle_finished().await;
    }
}

async fn handle_packet(
    packet: OscPacket,
    peer: SocketAddr,
    socket: &UdpSocket,
    state: &mut ControlState,
) {
    // Bundles only ever nest messages in practice; walk them iteratively.
    let mut queue = vec![packet];
    while let Some(packet) = queue.pop() {
        match packet {
            OscPacket::Message(msg) => dispatch(msg, peer, socket, state).await,
            OscPacket::Bundle(bundle) => queue.extend(bundle.content),
        }
    }
}

async fn dispatch(msg: OscMessage, peer: SocketAddr, socket: &UdpSocket, state: &mut ControlState) {
    let addr = msg.addr.as_str();

    // Movement stream first: it is by far the highest-rate input.
    if let Some(suffix) = addr.strip_prefix("/dance/") {
        let Some(part) = MovementPart::parse(suffix) else {
            log_unknown_once(addr);
            return;
        };
        let Some(value) = arg_f32(&msg, 0) else {
            log_bad_args_once(addr);
            return;
        };
        state.dance(part, value);
        return;
    }

    // EQ-family handlers bail before argument parsing when filters are off,
    // so automation bursts cost nothing.
    if matches!(addr, "/deck_eq" | "/deck_eq_all" | "/deck_filter") && !state.filters_enabled() {
        return;
    }

    match addr {
        "/load_buffer" => {
            let (Some(id), Some(path), Some(name)) =
                (arg_i32(&msg, 0), arg_str(&msg, 1), arg_str(&msg, 2))
            else {
                log_bad_args_once(addr);
                return;
            };
            if id < 0 {
                log_bad_args_once(addr);
                return;
            }
            let (path, name) = (path.to_string(), name.to_string());
            state.load_buffer(id as u32, path, name).await;
        }
        "/free_buffer" => {
            let Some(id) = arg_i32(&msg, 0) else {
                log_bad_args_once(addr);
                return;
            };
            state.free_buffer(id.max(0) as u32);
        }
        "/cue" => {
            let (Some(deck), Some(path), Some(position)) =
                (arg_deck(&msg, 0), arg_str(&msg, 1), arg_f64(&msg, 2))
            else {
                log_bad_args_once(addr);
                return;
            };
            state.cue(deck, path.to_string(), position);
        }
        "/play_stem" => {
            let (Some(id), Some(rate), Some(volume), Some(looping), Some(start)) = (
                arg_i32(&msg, 0),
                arg_f32(&msg, 1),
                arg_f32(&msg, 2),
                arg_i32(&msg, 3),
                arg_f64(&msg, 4),
            ) else {
                log_bad_args_once(addr);
                return;
            };
            state
                .play_stem(id.max(0) as u32, rate, volume, looping != 0, start)
                .await;
        }
        "/stop_stem" => {
            let Some(id) = arg_i32(&msg, 0) else {
                log_bad_args_once(addr);
                return;
            };
            state.stop_stem(id.max(0) as u32);
        }
        "/stem_volume" => {
            let (Some(id), Some(volume)) = (arg_i32(&msg, 0), arg_f32(&msg, 1)) else {
                log_bad_args_once(addr);
                return;
            };
            state.stem_volume(id.max(0) as u32, volume);
        }
        "/crossfade_levels" => {
            let mut weights = Vec::with_capacity(4);
            for index in 0..4 {
                match arg_f32(&msg, index) {
                    Some(w) => weights.push(w),
                    None => break,
                }
            }
            if weights.len() < 2 {
                log_bad_args_once(addr);
                return;
            }
            state.crossfade_levels(&weights);
        }
        "/start_group" => {
            let Some(delay) = arg_f64(&msg, 0) else {
                log_bad_args_once(addr);
                return;
            };
            let mut decks = Vec::new();
            for index in 1..msg.args.len() {
                match arg_str(&msg, index).and_then(DeckLabel::parse) {
                    Some(deck) => decks.push(deck),
                    None => {
                        log_bad_args_once(addr);
                        return;
                    }
                }
            }
            if decks.is_empty() {
                log_bad_args_once(addr);
                return;
            }
            state.start_group(delay, decks).await;
        }
        "/deck_eq" => {
            let (Some(deck), Some(band), Some(percent)) = (
                arg_deck(&msg, 0),
                arg_str(&msg, 1).and_then(EqBand::parse),
                arg_f32(&msg, 2),
            ) else {
                log_bad_args_once(addr);
                return;
            };
            state.deck_eq(deck, band, percent);
        }
        "/deck_eq_all" => {
            let (Some(deck), Some(low), Some(mid), Some(high)) = (
                arg_deck(&msg, 0),
                arg_f32(&msg, 1),
                arg_f32(&msg, 2),
                arg_f32(&msg, 3),
            ) else {
                log_bad_args_once(addr);
                return;
            };
            state.deck_eq_all(deck, low, mid, high);
        }
        "/deck_filter" => {
            // Reserved verb. Filters are enabled here (the disabled case
            // returned above); acknowledge and ignore.
            log::debug!("OSC: /deck_filter is reserved, ignoring");
        }
        "/set_tempo" => {
            let Some(bpm) = arg_f32(&msg, 0) else {
                log_bad_args_once(addr);
                return;
            };
            state.governor.force_bpm(bpm);
        }
        "/master_volume" => {
            let Some(volume) = arg_f32(&msg, 0) else {
                log_bad_args_once(addr);
                return;
            };
            state.master_volume(volume);
        }
        "/mixer_cleanup" => {
            state.mixer_cleanup();
        }
        "/get_status" => {
            let reply = OscPacket::Message(OscMessage {
                addr: "/status.reply".to_string(),
                args: state.status_args(),
            });
            match rosc::encoder::encode(&reply) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, peer).await {
                        log::warn!("OSC: Failed to send status reply to {}: {}", peer, e);
                    }
                }
                Err(e) => log::warn!("OSC: Failed to encode status reply: {:?}", e),
            }
        }
        _ => log_unknown_once(addr),
    }
}
