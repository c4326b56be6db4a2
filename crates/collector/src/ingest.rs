//! Thread de ingestão: drena o channel de mensagens brutas, decodifica e
//! entrega ao ledger.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use mesh_core::decode::{DecodeError, decode_message};
use mesh_core::store::Store;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Quantos bytes do payload aparecem no log de falha.
const PREVIEW_LEN: usize = 64;

/// Mensagem bruta vinda do broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Decodifica uma mensagem e aplica o resultado no ledger.
///
/// Em caso de erro o ledger não é tocado.
pub fn process_message(store: &Store, msg: &InboundMessage) -> Result<usize, DecodeError> {
    let decoded = decode_message(&msg.topic, &msg.payload)?;
    Ok(store.apply(decoded))
}

/// Inicia a thread de ingestão. Termina quando o channel fecha ou quando
/// `shutdown` é levantado.
pub fn spawn_ingest_thread(
    rx: Receiver<InboundMessage>,
    store: Arc<Store>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ingest".into())
        .spawn(move || ingest_loop(&rx, &store, &shutdown))
}

fn ingest_loop(rx: &Receiver<InboundMessage>, store: &Store, shutdown: &AtomicBool) {
    info!("Thread de ingestão iniciada");
    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(msg) => match process_message(store, &msg) {
                Ok(count) => debug!("{}: {count} medições", msg.topic),
                Err(e) => debug!("{e} – payload: {}", preview(&msg.payload)),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Thread de ingestão encerrada");
}

/// Primeiros bytes do payload em texto, ou em hex quando não é UTF-8.
pub fn preview(payload: &[u8]) -> String {
    let head = &payload[..payload.len().min(PREVIEW_LEN)];
    let mut out = match std::str::from_utf8(head) {
        Ok(text) => text.to_string(),
        Err(_) => head.iter().fold(String::with_capacity(head.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        }),
    };
    if payload.len() > PREVIEW_LEN {
        out.push('…');
    }
    out
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn msg(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.into(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn json_message_lands_in_store() {
        let store = Store::new();
        let count = process_message(
            &store,
            &msg("msh/node1", br#"{"data_type":"temperature","value":21.5}"#),
        )
        .unwrap();

        assert_eq!(count, 1);
        let data = store.measurements_for("node1");
        assert_eq!(data[0].value, 21.5);
        assert!(store.device("node1").is_some());
    }

    #[test]
    fn base64_envelope_lands_in_store() {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;
        use mesh_core::wire;
        use prost::Message;

        let telemetry = wire::Telemetry {
            time: 1_700_000_000,
            variant: Some(wire::telemetry::Variant::DeviceMetrics(wire::DeviceMetrics {
                battery_level: Some(87),
                ..Default::default()
            })),
        };
        let envelope = wire::ServiceEnvelope {
            packet: Some(wire::MeshPacket {
                from: 0xdeadbeef,
                payload_variant: Some(wire::mesh_packet::PayloadVariant::Decoded(wire::Data {
                    portnum: wire::PortNum::TelemetryApp as i32,
                    payload: telemetry.encode_to_vec(),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            ..Default::default()
        };
        let payload = STANDARD.encode(envelope.encode_to_vec());

        let store = Store::new();
        let count = process_message(&store, &msg("msh/US/2/e/LongFast", payload.as_bytes()))
            .unwrap();

        assert_eq!(count, 1);
        let data = store.measurements_for("deadbeef");
        assert_eq!(data[0].data_type, "battery_level");
        assert_eq!(data[0].value, 87.0);
        assert_eq!(data[0].timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn failed_decode_leaves_store_untouched() {
        let store = Store::new();
        let res = process_message(&store, &msg("msh/x", b"not a mesh payload"));
        assert!(matches!(res, Err(DecodeError::UnrecognizedPayload { .. })));
        assert!(store.all().is_empty());
        assert!(store.devices().is_empty());
    }

    #[test]
    fn preview_truncates_and_hexes() {
        assert_eq!(preview(b"abc"), "abc");
        assert_eq!(preview(&[0xff, 0x00, 0x10]), "ff0010");
        let long = vec![b'a'; 100];
        assert_eq!(preview(&long).chars().count(), PREVIEW_LEN + 1);
    }

    #[test]
    fn thread_drains_channel_until_closed() {
        let store = Arc::new(Store::new());
        let (tx, rx) = bounded(8);
        let handle =
            spawn_ingest_thread(rx, Arc::clone(&store), Arc::new(AtomicBool::new(false)))
                .unwrap();

        tx.send(msg("msh/a", br#"{"data_type":"voltage","value":3.7}"#))
            .unwrap();
        tx.send(msg("msh/a", b"garbage")).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(store.measurements_for("a").len(), 1);
    }
}
