//! Ledger de telemetria em memória.
//!
//! Um único mutex protege o agregado inteiro (medições por nó + diretório
//! de nós), então cada operação é linearizável e uma medição nunca fica
//! visível sem o registro de nó correspondente. O journal, quando
//! configurado, é escrito depois que o mutex é liberado.

use crate::journal::{Journal, JournalError, JournalRecord};
use crate::types::{Decoded, NodeInfo, Telemetry};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Estado protegido pelo mutex.
#[derive(Debug, Default)]
struct Ledger {
    data: HashMap<String, Vec<Telemetry>>,
    nodes: HashMap<String, NodeInfo>,
}

impl Ledger {
    /// Anexa a medição; devolve `true` se o nó era inédito.
    fn append(&mut self, t: Telemetry) -> bool {
        let created = !self.nodes.contains_key(&t.node_id);
        if created {
            self.nodes
                .insert(t.node_id.clone(), NodeInfo::bare(&t.node_id));
        }
        self.data.entry(t.node_id.clone()).or_default().push(t);
        created
    }

    fn upsert(&mut self, info: NodeInfo) {
        self.nodes.insert(info.id.clone(), info);
    }
}

/// Ledger compartilhado entre o assinante MQTT, o poller e a API HTTP.
#[derive(Debug, Default)]
pub struct Store {
    ledger: Mutex<Ledger>,
    journal: Option<Journal>,
}

impl Store {
    /// Ledger puramente em memória.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger com journal em disco, recarregado a partir dos registros já
    /// gravados.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let (journal, records) = Journal::open(path)?;
        let mut ledger = Ledger::default();
        for record in records {
            match record {
                JournalRecord::Measurement(t) => {
                    ledger.append(t);
                }
                JournalRecord::Device(info) => ledger.upsert(info),
            }
        }
        debug!(
            "Ledger recarregado: {} nós, {} séries",
            ledger.nodes.len(),
            ledger.data.len()
        );

        Ok(Self {
            ledger: Mutex::new(ledger),
            journal: Some(journal),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, record: JournalRecord) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.write(&record) {
                warn!("Falha ao gravar journal: {e}");
            }
        }
    }

    /// Anexa uma medição à série do nó, criando o registro do nó se inédito.
    pub fn append(&self, t: Telemetry) {
        debug!(
            "store: add node={} type={} value={}",
            t.node_id, t.data_type, t.value
        );
        // O registro automático do nó não vai para o journal: o replay da
        // medição o recria, e assim não sobrescreve um upsert concorrente.
        let record = self.journal.as_ref().map(|_| t.clone());
        let node_id = t.node_id.clone();
        if self.lock().append(t) {
            debug!("Nó descoberto: {node_id}");
        }
        if let Some(t) = record {
            self.persist(JournalRecord::Measurement(t));
        }
    }

    /// Substitui o registro do nó por inteiro (sem merge de campos).
    pub fn upsert_device(&self, info: NodeInfo) {
        debug!("Registro de nó atualizado: {info:?}");
        let record = self.journal.as_ref().map(|_| info.clone());
        self.lock().upsert(info);

        if let Some(info) = record {
            self.persist(JournalRecord::Device(info));
        }
    }

    /// Entrega um resultado do decodificador; devolve quantas medições entraram.
    pub fn apply(&self, decoded: Decoded) -> usize {
        let count = decoded.telemetry.len();
        for t in decoded.telemetry {
            self.append(t);
        }
        if let Some(info) = decoded.node_info {
            self.upsert_device(info);
        }
        count
    }

    /// Cópia da série do nó (vazia se desconhecido).
    pub fn measurements_for(&self, id: &str) -> Vec<Telemetry> {
        self.lock().data.get(id).cloned().unwrap_or_default()
    }

    /// Cópia de todas as séries.
    pub fn all(&self) -> HashMap<String, Vec<Telemetry>> {
        self.lock().data.clone()
    }

    /// Cópia de todos os registros de nó, em ordem não especificada.
    pub fn devices(&self) -> Vec<NodeInfo> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Consulta pontual de um nó.
    pub fn device(&self, id: &str) -> Option<NodeInfo> {
        self.lock().nodes.get(id).cloned()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::sync::Arc;

    fn tel(node: &str, kind: &str, value: f64) -> Telemetry {
        Telemetry::new(
            node,
            kind,
            value,
            DateTime::from_timestamp(1_700_000_001, 0).unwrap(),
        )
    }

    #[test]
    fn append_auto_creates_bare_device() {
        let store = Store::new();
        assert!(store.device("n1").is_none());

        store.append(tel("n1", "temperature", 10.0));

        assert_eq!(store.device("n1"), Some(NodeInfo::bare("n1")));
        assert_eq!(store.measurements_for("n1").len(), 1);
    }

    #[test]
    fn append_does_not_touch_existing_device() {
        let store = Store::new();
        store.upsert_device(NodeInfo {
            id: "n1".into(),
            long_name: "Base".into(),
            ..Default::default()
        });
        store.append(tel("n1", "voltage", 3.7));
        assert_eq!(store.device("n1").unwrap().long_name, "Base");
    }

    #[test]
    fn upsert_replaces_wholesale() {
        let store = Store::new();
        store.upsert_device(NodeInfo {
            id: "n".into(),
            long_name: "A".into(),
            firmware: "2.0".into(),
            ..Default::default()
        });
        store.upsert_device(NodeInfo {
            id: "n".into(),
            long_name: String::new(),
            ..Default::default()
        });
        let info = store.device("n").unwrap();
        assert_eq!(info.long_name, "");
        assert_eq!(info.firmware, "");
    }

    #[test]
    fn series_keeps_insertion_order() {
        let store = Store::new();
        let late = Telemetry::new("n", "t", 2.0, DateTime::from_timestamp(2000, 0).unwrap());
        let early = Telemetry::new("n", "t", 1.0, DateTime::from_timestamp(1000, 0).unwrap());
        store.append(late.clone());
        store.append(early.clone());
        assert_eq!(store.measurements_for("n"), vec![late, early]);
    }

    #[test]
    fn reads_are_copies() {
        let store = Store::new();
        store.append(tel("n", "t", 1.0));
        let mut copy = store.measurements_for("n");
        copy.clear();
        assert_eq!(store.measurements_for("n").len(), 1);
        assert!(store.measurements_for("unknown").is_empty());
    }

    #[test]
    fn apply_delivers_measurements_and_node() {
        let store = Store::new();
        let decoded = Decoded {
            telemetry: vec![tel("a", "latitude", 1.0), tel("a", "longitude", 2.0)],
            node_info: Some(NodeInfo {
                id: "b".into(),
                short_name: "B".into(),
                ..Default::default()
            }),
        };
        assert_eq!(store.apply(decoded), 2);
        let mut ids: Vec<_> = store.devices().into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn concurrent_producers_keep_directory_superset() {
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        store.append(tel(&format!("node{i}"), "t", f64::from(j)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for (id, series) in store.all() {
            assert_eq!(series.len(), 100);
            assert!(store.device(&id).is_some());
        }
        assert_eq!(store.devices().len(), 4);
    }

    #[test]
    fn journal_reload_restores_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshdump.journal");

        {
            let store = Store::open(&path).unwrap();
            store.append(tel("n1", "temp", 42.0));
            store.upsert_device(NodeInfo {
                id: "n1".into(),
                long_name: "node1".into(),
                ..Default::default()
            });
        }

        let store = Store::open(&path).unwrap();
        let info = store.device("n1").unwrap();
        assert_eq!(info.long_name, "node1");
        let data = store.measurements_for("n1");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].data_type, "temp");
        assert_eq!(data[0].value, 42.0);
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshdump.journal");

        Store::open(&path).unwrap().append(tel("a", "temp", 1.0));

        // Escrita interrompida: header sem corpo
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0x4D, 1, 50, 0])
            .unwrap();

        Store::open(&path).unwrap().append(tel("b", "temp", 2.0));

        let store = Store::open(&path).unwrap();
        assert_eq!(store.measurements_for("a").len(), 1);
        assert_eq!(store.measurements_for("b").len(), 1);
        assert!(store.device("b").is_some());
    }
}
