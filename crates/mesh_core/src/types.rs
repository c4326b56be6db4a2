//! Tipos normalizados que saem do decodificador e entram no ledger.
//!
//! Os nomes de campo em JSON seguem o formato publicado pelos nós
//! (`node_id`, `data_type`, …). Os aliases aceitam também a forma
//! capitalizada (`NodeID`, `DataType`, …) emitida por coletores antigos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Medição
// ──────────────────────────────────────────────

/// Uma leitura escalar com timestamp, atribuída a um nó e a um tipo de dado.
///
/// Imutável depois de produzida. Várias medições podem compartilhar o par
/// `(node_id, timestamp)` (ex: latitude/longitude de um mesmo relatório).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Identificador do nó (8 dígitos hex na malha). Pode vir vazio no JSON
    /// e ser resolvido pelo tópico.
    #[serde(default, alias = "NodeID")]
    pub node_id: String,
    /// Nome canônico da grandeza (ex: "temperature", "battery_level")
    #[serde(alias = "DataType")]
    pub data_type: String,
    /// Ausente no JSON ⇒ `0.0`.
    #[serde(default, alias = "Value")]
    pub value: f64,
    /// Ausente no JSON ⇒ instante zero (época Unix), nunca "agora".
    #[serde(default, alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Telemetry {
    pub fn new(
        node_id: impl Into<String>,
        data_type: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            data_type: data_type.into(),
            value,
            timestamp,
        }
    }
}

// ──────────────────────────────────────────────
// Nó
// ──────────────────────────────────────────────

/// Registro de um nó da malha.
///
/// Sobrescrito por inteiro a cada atualização: um relatório com `long_name`
/// vazio apaga um nome conhecido anteriormente.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub firmware: String,
}

impl NodeInfo {
    /// Registro sem nomes, criado na primeira medição de um nó.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

// ──────────────────────────────────────────────
// Resultado da decodificação
// ──────────────────────────────────────────────

/// Unidade de saída do decodificador: zero ou mais medições e, opcionalmente,
/// uma atualização de registro de nó.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub telemetry: Vec<Telemetry>,
    pub node_info: Option<NodeInfo>,
}

impl Decoded {
    pub fn measurements(telemetry: Vec<Telemetry>) -> Self {
        Self {
            telemetry,
            node_info: None,
        }
    }

    pub fn node(info: NodeInfo) -> Self {
        Self {
            telemetry: Vec::new(),
            node_info: Some(info),
        }
    }

    /// Verdadeiro quando não há nada para entregar ao ledger.
    pub fn is_empty(&self) -> bool {
        self.telemetry.is_empty() && self.node_info.is_none()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_accepts_snake_and_capitalized_fields() {
        let snake: Telemetry =
            serde_json::from_str(r#"{"node_id":"n1","data_type":"temperature","value":12.5}"#)
                .unwrap();
        let caps: Telemetry =
            serde_json::from_str(r#"{"NodeID":"n1","DataType":"temperature","Value":12.5}"#)
                .unwrap();
        assert_eq!(snake, caps);
        assert_eq!(snake.node_id, "n1");
    }

    #[test]
    fn missing_timestamp_is_epoch() {
        let t: Telemetry =
            serde_json::from_str(r#"{"data_type":"voltage","value":3.7}"#).unwrap();
        assert!(t.node_id.is_empty());
        assert_eq!(t.timestamp.timestamp(), 0);
    }

    #[test]
    fn missing_value_is_zero() {
        let t: Telemetry =
            serde_json::from_str(r#"{"node_id":"n1","data_type":"voltage"}"#).unwrap();
        assert_eq!(t.value, 0.0);
    }

    #[test]
    fn data_type_is_required() {
        let res = serde_json::from_str::<Telemetry>(r#"{"node_id":"n1","value":1.0}"#);
        assert!(res.is_err());
    }

    #[test]
    fn node_info_fields_default_to_empty() {
        let info: NodeInfo = serde_json::from_str(r#"{"long_name":"Tester"}"#).unwrap();
        assert!(info.id.is_empty());
        assert_eq!(info.long_name, "Tester");
        assert!(info.firmware.is_empty());
    }

    #[test]
    fn decoded_emptiness() {
        assert!(Decoded::default().is_empty());
        assert!(!Decoded::node(NodeInfo::bare("n1")).is_empty());
    }
}
