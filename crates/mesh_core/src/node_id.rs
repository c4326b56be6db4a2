//! Resolução do identificador de nó.
//!
//! Precedência, do mais para o menos confiável:
//! 1. identificador explícito no payload (resolvido por quem chama);
//! 2. segmento do tópico com exatamente 8 dígitos hex (o primeiro vence);
//! 3. o último segmento de um tópico curto (`node1` ou `msh/node1`).

/// Comprimento do identificador canônico (endereço de 32 bits em hex).
pub const NODE_ID_LEN: usize = 8;

/// Formata um endereço numérico da malha como 8 dígitos hex minúsculos.
pub fn format_node_num(num: u32) -> String {
    format!("{num:08x}")
}

/// `true` se o segmento tem o formato canônico de identificador.
pub fn is_node_id(segment: &str) -> bool {
    segment.len() == NODE_ID_LEN && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Remove o sigilo `!` usado pelo firmware nos campos `sender`.
pub fn strip_sigil(sender: &str) -> &str {
    sender.strip_prefix('!').unwrap_or(sender)
}

/// Deriva o identificador a partir de um tópico `/`-delimitado.
///
/// Retorna `None` quando nenhuma regra produz um identificador não vazio.
pub fn node_id_from_topic(topic: &str) -> Option<String> {
    let segments: Vec<&str> = topic.split('/').collect();

    if let Some(seg) = segments.iter().find(|s| is_node_id(s)) {
        return Some(seg.to_ascii_lowercase());
    }

    // Fallback: id solto ou id logo abaixo de um único prefixo raiz
    if segments.len() <= 2 {
        let last = segments.last().copied().unwrap_or_default();
        if !last.is_empty() {
            return Some(last.to_string());
        }
    }

    None
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
