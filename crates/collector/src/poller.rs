//! Polling HTTP direto dos nós (`GET /api/v1/telemetry`).

use mesh_core::config::PollerConfig;
use mesh_core::store::Store;
use mesh_core::types::Telemetry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Erros de uma busca direta.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Falha de transporte: {0}")]
    Transport(String),

    #[error("Status inesperado {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Erro ao ler corpo: {0}")]
    Body(#[from] std::io::Error),

    #[error("Telemetria inválida: {source}: {body}")]
    Parse {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// URL do endpoint de telemetria de um host (`ip` ou `ip:porta`).
pub fn telemetry_url(host: &str) -> String {
    format!("http://{host}/api/v1/telemetry")
}

/// Interpreta o corpo: um array JSON de medições.
pub fn parse_telemetry_body(body: &str) -> Result<Vec<Telemetry>, FetchError> {
    serde_json::from_str(body).map_err(|source| FetchError::Parse {
        source,
        body: body.trim().to_string(),
    })
}

/// Busca a telemetria de um nó.
pub fn fetch_telemetry(agent: &ureq::Agent, host: &str) -> Result<Vec<Telemetry>, FetchError> {
    let body = match agent.get(&telemetry_url(host)).call() {
        Ok(resp) => resp.into_string()?,
        Err(ureq::Error::Status(status, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: body.trim().to_string(),
            });
        }
        Err(e) => return Err(FetchError::Transport(e.to_string())),
    };
    parse_telemetry_body(&body)
}

/// Descarta medições sem `node_id` ou sem `data_type`.
pub fn usable_measurements(data: Vec<Telemetry>) -> Vec<Telemetry> {
    data.into_iter()
        .filter(|t| !t.node_id.is_empty() && !t.data_type.is_empty())
        .collect()
}

/// Uma rodada: busca todos os hosts e entrega ao ledger.
///
/// Falhas de um host são logadas e não interrompem os demais. Retorna o
/// total aplicado.
pub fn poll_once(agent: &ureq::Agent, nodes: &[String], store: &Store) -> usize {
    let mut total = 0;
    for host in nodes {
        debug!("poller: buscando telemetria de {host}");
        match fetch_telemetry(agent, host) {
            Ok(data) => {
                let received = data.len();
                let usable = usable_measurements(data);
                if usable.len() < received {
                    debug!(
                        "poller: {} medições incompletas de {host} ignoradas",
                        received - usable.len()
                    );
                }
                info!("poller: {} entradas de {host}", usable.len());
                for t in usable {
                    store.append(t);
                    total += 1;
                }
            }
            Err(e) => warn!("poller: falha em {host}: {e}"),
        }
    }
    total
}

/// Inicia a thread do poller. A primeira rodada acontece depois de um
/// intervalo completo.
pub fn spawn_poller(
    config: PollerConfig,
    store: Arc<Store>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("poller".into())
        .spawn(move || poller_loop(&config, &store, &shutdown))
}

fn poller_loop(config: &PollerConfig, store: &Store, shutdown: &AtomicBool) {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build();
    let interval = Duration::from_secs(config.interval_secs);
    info!(
        "Poller iniciado: {} nós a cada {}s",
        config.nodes.len(),
        config.interval_secs
    );

    let mut next = Instant::now() + interval;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < next {
            // Dorme em fatias curtas para atender o shutdown
            std::thread::sleep((next - now).min(Duration::from_millis(250)));
            continue;
        }
        poll_once(&agent, &config.nodes, store);
        next += interval;
        if next < Instant::now() {
            next = Instant::now() + interval;
        }
    }
    info!("Poller encerrado");
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_host() {
        assert_eq!(
            telemetry_url("192.168.1.20"),
            "http://192.168.1.20/api/v1/telemetry"
        );
        assert_eq!(
            telemetry_url("10.0.0.3:8080"),
            "http://10.0.0.3:8080/api/v1/telemetry"
        );
    }

    #[test]
    fn body_with_both_field_styles() {
        let body = r#"[
            {"node_id":"abcd0001","data_type":"temperature","value":22.5,
             "timestamp":"2024-05-01T12:00:00Z"},
            {"NodeID":"abcd0001","DataType":"voltage","Value":3.9}
        ]"#;
        let data = parse_telemetry_body(body).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].timestamp.timestamp(), 1_714_564_800);
        assert_eq!(data[1].data_type, "voltage");
        assert_eq!(data[1].timestamp.timestamp(), 0);
    }

    #[test]
    fn incomplete_measurements_are_dropped() {
        let body = r#"[
            {"node_id":"x","data_type":"","value":1},
            {"node_id":"","data_type":"voltage","value":3.7},
            {"node_id":"x","data_type":"voltage","value":3.9}
        ]"#;
        let data = usable_measurements(parse_telemetry_body(body).unwrap());
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].node_id, "x");
        assert_eq!(data[0].data_type, "voltage");
    }

    #[test]
    fn invalid_body_carries_trimmed_text() {
        let err = parse_telemetry_body("  not json \n").unwrap_err();
        match err {
            FetchError::Parse { body, .. } => assert_eq!(body, "not json"),
            other => panic!("erro inesperado: {other:?}"),
        }
    }

    #[test]
    fn unreachable_host_is_skipped() {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(200))
            .build();
        let store = Store::new();
        // Porta 9 (discard) em loopback: conexão recusada
        let total = poll_once(&agent, &["127.0.0.1:9".to_string()], &store);
        assert_eq!(total, 0);
        assert!(store.all().is_empty());
    }
}
