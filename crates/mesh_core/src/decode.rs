//! Decodificador de payloads da malha.
//!
//! Um payload de formato desconhecido é testado contra cada esquema, em
//! ordem estrita; o primeiro que produzir algo vence:
//!
//! 1. medição JSON simples (`{"node_id":…,"data_type":…,"value":…}`)
//! 2. relatório de posição JSON (`{"type":"position",…}`)
//! 3. `ServiceEnvelope` protobuf (base64 ou bytes crus)
//! 4. `MapReport` protobuf sem envelope
//!
//! Cada tentativa engole o próprio erro de parse. Só quando todas falham o
//! chamador recebe [`DecodeError::UnrecognizedPayload`]. O decodificador é
//! uma função pura: não loga, não guarda estado e pode rodar em paralelo.

use crate::metrics::{telemetry_from_proto, unix_or};
use crate::node_id::{format_node_num, node_id_from_topic, strip_sigil};
use crate::types::{Decoded, NodeInfo, Telemetry};
use crate::wire::{self, PortNum};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use prost::Message;
use serde::Deserialize;
use std::borrow::Cow;

/// Fator das coordenadas inteiras (graus × 1e7).
pub const COORD_SCALE: f64 = 10_000_000.0;

/// Erro do decodificador.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Formato de payload não reconhecido (tópico: {topic})")]
    UnrecognizedPayload { topic: String },
}

/// Entrada compartilhada pelas tentativas.
struct Inbound<'a> {
    topic: &'a str,
    /// Payload sem espaços nas pontas (esquemas textuais)
    text: &'a [u8],
    /// Payload decodificado de base64, ou os bytes originais
    binary: Cow<'a, [u8]>,
    now: DateTime<Utc>,
}

type Trial = fn(&Inbound<'_>) -> Option<Decoded>;

const TRIALS: [Trial; 4] = [json_telemetry, json_position, envelope, map_report];

/// Decodifica um par `(tópico, payload)` usando o relógio atual como
/// timestamp padrão.
pub fn decode_message(topic: &str, payload: &[u8]) -> Result<Decoded, DecodeError> {
    decode_message_at(topic, payload, Utc::now())
}

/// Igual a [`decode_message`], com o instante "agora" explícito.
pub fn decode_message_at(
    topic: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<Decoded, DecodeError> {
    let unrecognized = || DecodeError::UnrecognizedPayload {
        topic: topic.to_string(),
    };

    let text = payload.trim_ascii();
    if text.is_empty() {
        return Err(unrecognized());
    }

    let binary = match STANDARD.decode(text) {
        Ok(bytes) => Cow::Owned(bytes),
        Err(_) => Cow::Borrowed(payload),
    };

    let input = Inbound {
        topic,
        text,
        binary,
        now,
    };

    TRIALS
        .iter()
        .find_map(|trial| trial(&input).filter(|d| !d.is_empty()))
        .ok_or_else(unrecognized)
}

// ──────────────────────────────────────────────
// 1. Medição JSON
// ──────────────────────────────────────────────

fn json_telemetry(input: &Inbound<'_>) -> Option<Decoded> {
    if !input.text.starts_with(b"{") {
        return None;
    }
    let mut tel: Telemetry = serde_json::from_slice(input.text).ok()?;
    if tel.data_type.is_empty() {
        return None;
    }
    if tel.node_id.is_empty() {
        tel.node_id = node_id_from_topic(input.topic)?;
    }
    Some(Decoded::measurements(vec![tel]))
}

// ──────────────────────────────────────────────
// 2. Posição JSON
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonPosition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: u32,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    timestamp: i64,
    payload: JsonPositionPayload,
}

#[derive(Debug, Deserialize)]
struct JsonPositionPayload {
    latitude_i: i64,
    longitude_i: i64,
    #[serde(default)]
    time: i64,
}

fn json_position(input: &Inbound<'_>) -> Option<Decoded> {
    if !input.text.starts_with(b"{") {
        return None;
    }
    let pos: JsonPosition = serde_json::from_slice(input.text).ok()?;
    if pos.kind != "position" {
        return None;
    }

    let sender = strip_sigil(&pos.sender);
    let id = if !sender.is_empty() {
        sender.to_string()
    } else if pos.from != 0 {
        format_node_num(pos.from)
    } else {
        node_id_from_topic(input.topic)?
    };

    // `payload.time` tem precedência sobre o `timestamp` da mensagem
    let ts = unix_or(pos.payload.time, unix_or(pos.timestamp, input.now));

    Some(Decoded::measurements(position_measurements(
        &id,
        pos.payload.latitude_i,
        pos.payload.longitude_i,
        None,
        ts,
    )))
}

// ──────────────────────────────────────────────
// 3. Envelope protobuf
// ──────────────────────────────────────────────

fn envelope(input: &Inbound<'_>) -> Option<Decoded> {
    let env = wire::ServiceEnvelope::decode(input.binary.as_ref()).ok()?;
    let pkt = env.packet.as_ref()?;
    let data = pkt.decoded()?;
    let id = format_node_num(pkt.from);

    match data.port() {
        PortNum::TelemetryApp => {
            let tm = wire::Telemetry::decode(data.payload.as_slice()).ok()?;
            Some(Decoded::measurements(telemetry_from_proto(&id, &tm, input.now)))
        }
        PortNum::NodeinfoApp => {
            let ni = wire::NodeInfo::decode(data.payload.as_slice()).ok()?;
            let mut info = NodeInfo::bare(format_node_num(ni.num));
            if let Some(user) = ni.user {
                info.long_name = user.long_name;
                info.short_name = user.short_name;
            }
            Some(Decoded::node(info))
        }
        PortNum::PositionApp => {
            let pos = wire::Position::decode(data.payload.as_slice()).ok()?;
            let ts = unix_or(pos.time, unix_or(pos.timestamp, input.now));
            Some(Decoded::measurements(position_measurements(
                &id,
                i64::from(pos.latitude_i.unwrap_or_default()),
                i64::from(pos.longitude_i.unwrap_or_default()),
                pos.altitude,
                ts,
            )))
        }
        // Envelope válido, mas sem nada que o ledger modele
        _ => None,
    }
}

// ──────────────────────────────────────────────
// 4. MapReport sem envelope
// ──────────────────────────────────────────────

fn map_report(input: &Inbound<'_>) -> Option<Decoded> {
    let report = wire::MapReport::decode(input.binary.as_ref()).ok()?;
    // O id deste formato vem sempre do tópico
    let id = node_id_from_topic(input.topic)?;
    Some(Decoded::node(NodeInfo {
        id,
        long_name: report.long_name,
        short_name: report.short_name,
        firmware: report.firmware_version,
    }))
}

/// `latitude` + `longitude`, e `altitude` apenas quando diferente de zero.
fn position_measurements(
    id: &str,
    latitude_i: i64,
    longitude_i: i64,
    altitude: Option<i32>,
    ts: DateTime<Utc>,
) -> Vec<Telemetry> {
    let mut out = vec![
        Telemetry::new(id, "latitude", latitude_i as f64 / COORD_SCALE, ts),
        Telemetry::new(id, "longitude", longitude_i as f64 / COORD_SCALE, ts),
    ];
    if let Some(alt) = altitude.filter(|a| *a != 0) {
        out.push(Telemetry::new(id, "altitude", f64::from(alt), ts));
    }
    out
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
