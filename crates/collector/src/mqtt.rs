//! Assinante MQTT em thread dedicada (cliente síncrono do rumqttc).
//!
//! Cada publish não vazio vira uma [`InboundMessage`] no channel de
//! ingestão. Erros de conexão são logados e a reconexão acontece depois
//! de [`RETRY_DELAY`].

use crate::ingest::InboundMessage;
use crossbeam_channel::Sender;
use mesh_core::config::MqttConfig;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Espera entre tentativas de reconexão.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

const WELCOME_PAYLOAD: &str = "MeshDump connected";

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Broker MQTT inválido: {0}")]
    InvalidBroker(String),

    #[error("Falha ao criar thread MQTT: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Monta as opções de conexão a partir da configuração.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions, MqttError> {
    let (host, port) = config
        .broker_addr()
        .ok_or_else(|| MqttError::InvalidBroker(config.broker.clone()))?;

    let client_id = if config.client_id.is_empty() {
        format!("meshdump-{}", std::process::id())
    } else {
        config.client_id.clone()
    };

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if !config.username.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }
    Ok(options)
}

/// Inicia o assinante. A thread termina quando `shutdown` é levantado ou
/// quando o channel de ingestão fecha.
pub fn spawn_subscriber(
    config: MqttConfig,
    tx: Sender<InboundMessage>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, MqttError> {
    let options = mqtt_options(&config)?;
    let handle = std::thread::Builder::new()
        .name("mqtt-subscriber".into())
        .spawn(move || subscriber_loop(options, &config, &tx, &shutdown))?;
    Ok(handle)
}

fn subscriber_loop(
    options: MqttOptions,
    config: &MqttConfig,
    tx: &Sender<InboundMessage>,
    shutdown: &AtomicBool,
) {
    info!("Conectando ao broker {}", config.broker);
    let (client, mut connection) = Client::new(options, 64);

    for notification in connection.iter() {
        if shutdown.load(Ordering::Relaxed) {
            let _ = client.disconnect();
            break;
        }

        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // A sessão é limpa a cada reconexão: assina de novo
                info!("MQTT conectado, assinando {}", config.topic);
                if let Err(e) = client.try_subscribe(config.topic.as_str(), QoS::AtMostOnce) {
                    error!("Falha ao assinar {}: {e}", config.topic);
                }
                if let Err(e) = client.try_publish(
                    config.welcome_topic.as_str(),
                    QoS::AtMostOnce,
                    false,
                    WELCOME_PAYLOAD,
                ) {
                    warn!("Falha ao publicar boas-vindas: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.payload.is_empty() {
                    continue;
                }
                let msg = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if tx.send(msg).is_err() {
                    debug!("Channel de ingestão fechado, encerrando assinante");
                    let _ = client.disconnect();
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("Erro MQTT: {e}. Tentando novamente em {}s...", RETRY_DELAY.as_secs());
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
    info!("Assinante MQTT encerrado");
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_config() {
        let config = MqttConfig {
            broker: "tcp://broker.local:1884".into(),
            client_id: "meshdump-test".into(),
            username: "mesh".into(),
            password: "secret".into(),
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "meshdump-test");
        assert_eq!(
            options.credentials(),
            Some(("mesh".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn generated_client_id_without_credentials() {
        let config = MqttConfig {
            broker: "mqtt.example.org".into(),
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert!(options.client_id().starts_with("meshdump-"));
        assert_eq!(options.credentials(), None);
    }

    #[test]
    fn invalid_broker_is_rejected() {
        let config = MqttConfig {
            broker: "tcp://host:port".into(),
            ..Default::default()
        };
        assert!(matches!(
            mqtt_options(&config),
            Err(MqttError::InvalidBroker(_))
        ));
    }
}
