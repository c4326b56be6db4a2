//! # MeshDump
//!
//! Coletor de telemetria de uma malha LoRa: assina o broker MQTT, consulta
//! nós diretamente por HTTP, normaliza tudo num ledger em memória (com
//! journal opcional em disco) e serve o resultado por uma API HTTP.
//!
//! ## Threads
//! - `mqtt-subscriber`: publish MQTT → channel
//! - `ingest`: channel → decodificador → ledger
//! - `poller`: `GET /api/v1/telemetry` de cada nó → ledger
//! - principal: API HTTP

mod http_api;
mod ingest;
mod mqtt;
mod poller;

use anyhow::{Context, bail};
use crossbeam_channel::bounded;
use ingest::InboundMessage;
use mesh_core::config::AppConfig;
use mesh_core::store::Store;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Capacidade do channel MQTT → ingestão.
const CHANNEL_CAPACITY: usize = 256;

fn main() -> anyhow::Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    AppConfig::load_dotenv();
    let config_path = AppConfig::default_path();
    let mut config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível gravar config padrão: {e}");
        }
    }
    config.apply_env();

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("Configuração inválida ({} erros)", errors.len());
    }

    // ── Ledger ──
    let store = if config.storage.data_file.is_empty() {
        info!("Ledger somente em memória");
        Arc::new(Store::new())
    } else {
        let store = Store::open(&config.storage.data_file)
            .with_context(|| format!("Falha ao abrir {}", config.storage.data_file))?;
        Arc::new(store)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();

    // ── MQTT + ingestão ──
    if config.mqtt.enabled() {
        let (tx, rx) = bounded::<InboundMessage>(CHANNEL_CAPACITY);
        workers.push(
            ingest::spawn_ingest_thread(rx, Arc::clone(&store), Arc::clone(&shutdown))
                .context("Falha ao criar thread de ingestão")?,
        );
        workers.push(mqtt::spawn_subscriber(
            config.mqtt.clone(),
            tx,
            Arc::clone(&shutdown),
        )?);
    } else {
        info!("MQTT_BROKER não configurado, assinante desativado");
    }

    // ── Poller ──
    if !config.poller.nodes.is_empty() {
        workers.push(
            poller::spawn_poller(config.poller.clone(), Arc::clone(&store), Arc::clone(&shutdown))
                .context("Falha ao criar thread do poller")?,
        );
    }

    // ── API HTTP (thread principal) ──
    let result = http_api::serve(&config.http.bind, Arc::clone(&store));

    shutdown.store(true, Ordering::Relaxed);
    for worker in workers {
        if worker.join().is_err() {
            warn!("Thread terminou com pânico");
        }
    }

    result.context("API HTTP encerrada")
}
