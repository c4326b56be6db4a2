//! Configuração unificada via TOML.
//!
//! Ordem de precedência: `config.toml` → arquivo `.env` → variáveis de
//! ambiente (`MQTT_BROKER`, `DATA_FILE`, …).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Porta padrão do broker MQTT.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Erros ao persistir a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao gravar {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Assinatura MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// URL do broker (`tcp://host:1883`). Vazio = MQTT desativado
    pub broker: String,
    /// Filtro de tópico assinado
    pub topic: String,
    pub username: String,
    pub password: String,
    /// Client id (vazio = gerado a partir do PID)
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Tópico da mensagem de boas-vindas publicada ao conectar
    pub welcome_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            topic: "#".into(),
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            keep_alive_secs: 30,
            welcome_topic: "meshdump/welcome".into(),
        }
    }
}

impl MqttConfig {
    pub fn enabled(&self) -> bool {
        !self.broker.trim().is_empty()
    }

    /// Extrai `(host, porta)` do broker.
    ///
    /// Aceita `tcp://host:port`, `mqtt://host:port`, `host:port` ou `host`.
    pub fn broker_addr(&self) -> Option<(String, u16)> {
        let raw = self.broker.trim();
        let rest = raw
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(raw)
            .trim_end_matches('/');
        if rest.is_empty() {
            return None;
        }
        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                Some((host.to_string(), port.parse().ok()?))
            }
            Some(_) => None,
            None => Some((rest.to_string(), DEFAULT_MQTT_PORT)),
        }
    }
}

/// Polling HTTP direto dos nós.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Hosts (`ip` ou `ip:porta`) que expõem `/api/v1/telemetry`
    pub nodes: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            interval_secs: 60,
            timeout_secs: 5,
        }
    }
}

/// API HTTP de leitura.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

/// Persistência do ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Caminho do journal (vazio = só memória)
    pub data_file: String,
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub poller: PollerConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        exe_dir().join("config.toml")
    }

    /// Carrega `.env` do diretório atual ou, na falta, do lado do executável.
    ///
    /// Variáveis já definidas no ambiente não são sobrescritas.
    pub fn load_dotenv() {
        let loaded = dotenvy::dotenv().or_else(|_| {
            let beside_exe = exe_dir().join(".env");
            dotenvy::from_path(&beside_exe).map(|_| beside_exe)
        });
        match loaded {
            Ok(path) => info!("Variáveis carregadas de {}", path.display()),
            Err(e) => debug!("Nenhum .env carregado: {e}"),
        }
    }

    /// Aplica overrides das variáveis de ambiente do processo.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Aplica overrides vindos de `lookup` (chave → valor).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MQTT_BROKER") {
            self.mqtt.broker = v;
        }
        if let Some(v) = get("MQTT_TOPIC") {
            self.mqtt.topic = v;
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.mqtt.username = v;
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.mqtt.password = v;
        }
        if let Some(v) = get("DATA_FILE") {
            self.storage.data_file = v;
        }
        if let Some(v) = get("POLL_NODES") {
            self.poller.nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("POLL_INTERVAL_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.poller.interval_secs = secs,
                Err(e) => warn!("POLL_INTERVAL_SECS inválido ({v}): {e}"),
            }
        }
        if let Some(v) = get("HTTP_ADDR") {
            self.http.bind = v;
        }
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.mqtt.enabled() && self.mqtt.broker_addr().is_none() {
            errors.push(format!("Broker MQTT inválido: {}", self.mqtt.broker));
        }
        if self.mqtt.topic.trim().is_empty() {
            errors.push("Tópico MQTT não pode ser vazio".into());
        }
        if !self.poller.nodes.is_empty() && self.poller.interval_secs == 0 {
            errors.push("Intervalo do poller não pode ser 0".into());
        }
        if self.http.bind.trim().is_empty() {
            errors.push("Endereço HTTP não pode ser vazio".into());
        }

        errors
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("."))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
