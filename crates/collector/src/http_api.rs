//! API HTTP de leitura do ledger (tiny_http).
//!
//! O roteamento é a função pura [`route`]; o servidor só traduz requisições
//! e respostas.

use mesh_core::store::Store;
use mesh_core::types::NodeInfo;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Falha ao abrir API em {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Resposta já roteada, independente do servidor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ApiResponse {
    fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status: 200,
                content_type: JSON,
                body,
            },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: TEXT,
            body: format!("{message}\n"),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: TEXT,
            body: String::new(),
        }
    }
}

/// Roteia uma requisição contra o ledger.
///
/// - `GET /api/telemetry/{id}` → série do nó
/// - `GET /api/nodes` → registros de nó
/// - `GET|POST /api/nodeinfo/{id}` → consulta ou substitui um registro
pub fn route(store: &Store, method: &Method, url: &str, body: &str) -> ApiResponse {
    let path = url.split(['?', '#']).next().unwrap_or_default();

    if let Some(id) = path.strip_prefix("/api/telemetry/") {
        if id.is_empty() {
            return ApiResponse::error(400, "missing node");
        }
        return ApiResponse::json(&store.measurements_for(id));
    }

    if path == "/api/nodes" {
        return ApiResponse::json(&store.devices());
    }

    if let Some(id) = path.strip_prefix("/api/nodeinfo/") {
        if id.is_empty() {
            return ApiResponse::error(400, "missing node id");
        }
        return match method {
            Method::Get => match store.device(id) {
                Some(info) => ApiResponse::json(&info),
                None => ApiResponse {
                    status: 200,
                    content_type: JSON,
                    body: "{}".into(),
                },
            },
            Method::Post => match serde_json::from_str::<NodeInfo>(body) {
                Ok(mut info) => {
                    if info.id.is_empty() {
                        info.id = id.to_string();
                    }
                    store.upsert_device(info);
                    ApiResponse::no_content()
                }
                Err(e) => ApiResponse::error(400, &e.to_string()),
            },
            _ => ApiResponse::error(405, "method not allowed"),
        };
    }

    ApiResponse::error(404, "not found")
}

/// Abre o servidor em `addr` e atende requisições até o socket fechar.
pub fn serve(addr: &str, store: Arc<Store>) -> Result<(), HttpError> {
    let server = Server::http(addr).map_err(|source| HttpError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!("API HTTP escutando em {addr}");
    serve_on(&server, &store);
    Ok(())
}

/// Laço de atendimento sobre um servidor já aberto.
pub fn serve_on(server: &Server, store: &Store) {
    for request in server.incoming_requests() {
        handle(store, request);
    }
}

fn handle(store: &Store, mut request: Request) {
    let mut body = String::new();
    let response = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(store, request.method(), request.url(), &body),
        Err(e) => ApiResponse::error(400, &e.to_string()),
    };
    debug!("{} {} → {}", request.method(), request.url(), response.status);

    let mut reply = Response::from_string(response.body).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes()) {
        reply = reply.with_header(header);
    }
    if let Err(e) = request.respond(reply) {
        warn!("Falha ao responder requisição: {e}");
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::types::Telemetry;

    fn tel(node: &str, kind: &str, value: f64) -> Telemetry {
        Telemetry::new(node, kind, value, Default::default())
    }

    #[test]
    fn telemetry_for_node() {
        let store = Store::new();
        store.append(tel("n1", "temperature", 21.5));

        let res = route(&store, &Method::Get, "/api/telemetry/n1", "");
        assert_eq!(res.status, 200);
        assert_eq!(res.content_type, JSON);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&res.body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["data_type"], "temperature");
        assert_eq!(parsed[0]["value"], 21.5);
    }

    #[test]
    fn telemetry_unknown_node_is_empty_array() {
        let res = route(&Store::new(), &Method::Get, "/api/telemetry/nobody?x=1", "");
        assert_eq!(res.status, 200);
        assert_eq!(res.body, "[]");
    }

    #[test]
    fn telemetry_without_id_is_bad_request() {
        let res = route(&Store::new(), &Method::Get, "/api/telemetry/", "");
        assert_eq!(res.status, 400);
    }

    #[test]
    fn nodes_lists_auto_created_records() {
        let store = Store::new();
        store.append(tel("n1", "voltage", 3.7));
        let res = route(&store, &Method::Get, "/api/nodes", "");
        let nodes: Vec<NodeInfo> = serde_json::from_str(&res.body).unwrap();
        assert_eq!(nodes, vec![NodeInfo::bare("n1")]);
    }

    #[test]
    fn nodeinfo_unknown_is_empty_object() {
        let res = route(&Store::new(), &Method::Get, "/api/nodeinfo/ghost", "");
        assert_eq!(res.status, 200);
        assert_eq!(res.body, "{}");
    }

    #[test]
    fn nodeinfo_post_defaults_id_from_path() {
        let store = Store::new();
        let res = route(
            &store,
            &Method::Post,
            "/api/nodeinfo/abcd0001",
            r#"{"long_name":"Base","short_name":"BS"}"#,
        );
        assert_eq!(res.status, 204);
        assert!(res.body.is_empty());

        let res = route(&store, &Method::Get, "/api/nodeinfo/abcd0001", "");
        let info: NodeInfo = serde_json::from_str(&res.body).unwrap();
        assert_eq!(info.id, "abcd0001");
        assert_eq!(info.long_name, "Base");
    }

    #[test]
    fn nodeinfo_post_invalid_json() {
        let store = Store::new();
        let res = route(&store, &Method::Post, "/api/nodeinfo/n1", "{nope");
        assert_eq!(res.status, 400);
        assert!(store.device("n1").is_none());
    }

    #[test]
    fn nodeinfo_other_methods_and_unknown_paths() {
        let store = Store::new();
        assert_eq!(route(&store, &Method::Delete, "/api/nodeinfo/n1", "").status, 405);
        assert_eq!(route(&store, &Method::Get, "/api/nodeinfo/", "").status, 400);
        assert_eq!(route(&store, &Method::Get, "/", "").status, 404);
        assert_eq!(route(&store, &Method::Get, "/api/unknown", "").status, 404);
    }

    #[test]
    fn server_answers_over_socket() {
        let store = Arc::new(Store::new());
        store.append(tel("n1", "temperature", 20.0));

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let served = Arc::clone(&store);
        std::thread::spawn(move || serve_on(&server, &served));

        let resp = ureq::get(&format!("http://{addr}/api/telemetry/n1"))
            .call()
            .unwrap();
        assert_eq!(resp.header("Content-Type"), Some(JSON));
        let body: Vec<serde_json::Value> =
            serde_json::from_str(&resp.into_string().unwrap()).unwrap();
        assert_eq!(body.len(), 1);

        let err = ureq::get(&format!("http://{addr}/missing")).call().unwrap_err();
        assert!(matches!(err, ureq::Error::Status(404, _)));
    }
}
