//! # Mesh Core
//!
//! Crate compartilhada do MeshDump: decodifica mensagens publicadas pelos
//! nós da malha (JSON ou protobuf, cru ou em base64), normaliza em medições
//! e mantém o ledger concorrente de telemetria.
//!
//! ## Módulos
//! - [`types`] – Medição, registro de nó e resultado da decodificação
//! - [`node_id`] – Formatação de ids e resolução pelo tópico
//! - [`wire`] – Mensagens protobuf da malha (prost)
//! - [`metrics`] – Tabela de extração dos grupos de métricas
//! - [`decode`] – Cadeia de tentativas de decodificação
//! - [`store`] – Ledger em memória
//! - [`journal`] – Persistência binária do ledger
//! - [`config`] – Configuração unificada via TOML + ambiente

pub mod types;
pub mod node_id;
pub mod wire;
pub mod metrics;
pub mod decode;
pub mod store;
pub mod journal;
pub mod config;

// Re-exports convenientes
pub use types::{Decoded, NodeInfo, Telemetry};
pub use decode::{decode_message, decode_message_at, DecodeError};
pub use store::Store;
pub use config::AppConfig;
