//! Journal binário do ledger.
//!
//! Arquivo append-only que espelha as chamadas `append`/`upsert_device` do
//! [`Store`](crate::store::Store), para recarregar o ledger ao reiniciar.
//! Formato de cada registro:
//!
//! ```text
//! ┌──────────┬─────────┬──────────────┬──────────────────┐
//! │ Magic(1) │ Ver.(1) │ Tamanho(4 LE)│ Corpo bincode (N)│
//! └──────────┴─────────┴──────────────┴──────────────────┘
//! ```

use crate::types::{NodeInfo, Telemetry};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Magic byte que identifica registros do journal.
pub const MAGIC_BYTE: u8 = 0x4D; // 'M'

/// Versão atual do formato.
pub const JOURNAL_VERSION: u8 = 1;

/// Tamanho do header (magic + versão + tamanho do corpo).
const HEADER_SIZE: usize = 6;

/// Erros do journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Registro truncado ({0} bytes disponíveis, {1} esperados)")]
    Truncated(usize, usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {JOURNAL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),

    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Uma operação do ledger gravada em disco.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    Measurement(Telemetry),
    Device(NodeInfo),
}

/// Codifica um registro no formato `[MAGIC][VERSION][LEN][bincode...]`.
pub fn encode_record(record: &JournalRecord) -> Result<Vec<u8>, JournalError> {
    let body = bincode::serialize(record).map_err(|e| JournalError::Serialize(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|e| JournalError::Serialize(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(MAGIC_BYTE);
    frame.push(JOURNAL_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decodifica o primeiro registro de `data`.
///
/// Retorna o registro e quantos bytes ele ocupa.
pub fn decode_record(data: &[u8]) -> Result<(JournalRecord, usize), JournalError> {
    if data.len() < HEADER_SIZE {
        return Err(JournalError::Truncated(data.len(), HEADER_SIZE));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(JournalError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != JOURNAL_VERSION {
        return Err(JournalError::VersionMismatch(version));
    }

    let len = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
    let total = HEADER_SIZE + len;
    if data.len() < total {
        return Err(JournalError::Truncated(data.len(), total));
    }

    let record = bincode::deserialize(&data[HEADER_SIZE..total])
        .map_err(|e| JournalError::Deserialize(e.to_string()))?;
    Ok((record, total))
}

/// Decodifica todos os registros completos de um buffer.
///
/// Para no primeiro registro inválido ou truncado (ex: escrita interrompida
/// por queda de energia) e devolve o que foi lido até ali, junto com o
/// tamanho do prefixo válido.
pub fn decode_all(data: &[u8]) -> (Vec<JournalRecord>, usize) {
    let mut records = Vec::new();
    let mut valid = 0;
    while valid < data.len() {
        match decode_record(&data[valid..]) {
            Ok((record, used)) => {
                records.push(record);
                valid += used;
            }
            Err(e) => {
                warn!("Journal: {} bytes finais inválidos: {e}", data.len() - valid);
                break;
            }
        }
    }
    (records, valid)
}

/// Arquivo de journal aberto para append.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    /// Abre (ou cria) o journal e devolve os registros já gravados.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<JournalRecord>), JournalError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(io_err)?;

        let mut existing = Vec::new();
        file.read_to_end(&mut existing).map_err(io_err)?;
        let (records, valid) = decode_all(&existing);
        if valid < existing.len() {
            // Cauda rasgada: corta antes de voltar a anexar
            warn!(
                "Journal {}: truncando de {} para {} bytes",
                path.display(),
                existing.len(),
                valid
            );
            file.set_len(valid as u64).map_err(io_err)?;
        }
        info!("Journal {} aberto: {} registros", path.display(), records.len());

        Ok((
            Self {
                path,
                file: Mutex::new(file),
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grava um registro completo (um único `write_all`).
    pub fn write(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let frame = encode_record(record)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&frame)
            .and_then(|_| file.flush())
            .map_err(|source| JournalError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
