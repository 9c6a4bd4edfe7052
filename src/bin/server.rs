//! HTTP server for the chat UI
//! Minimal HTTP/1.1 handling over tokio TCP

use portfolio_query::context::SessionStore;
use portfolio_query::{build_dispatcher, AppConfig, RequestDispatcher};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<String>,
    message: String,
}

#[derive(Deserialize)]
struct EndSessionRequest {
    session_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let dispatcher = Arc::new(build_dispatcher(&config)?);

    let listener = TcpListener::bind(&config.server_addr).await?;
    info!("Server listening on http://{}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from {}", addr);
        tokio::spawn(handle_connection(stream, dispatcher.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, dispatcher: Arc<RequestDispatcher>) {
    let response = match read_request(&mut stream).await {
        Ok(request) => handle_request(&request, &dispatcher).await,
        Err(e) => {
            warn!("Failed to read request: {}", e);
            create_response(400, "Bad Request", r#"{"error":"malformed request"}"#)
        }
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Reads headers, then as many body bytes as Content-Length announces.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut data = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request too large"));
        }
        if let Some(header_end) = find_header_end(&data) {
            let headers = String::from_utf8_lossy(&data[..header_end]);
            let content_length = headers
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_request(request: &str, dispatcher: &RequestDispatcher) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", "{}");
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    let body = request
        .find("\r\n\r\n")
        .map(|i| request[i + 4..].trim())
        .unwrap_or("");

    info!("{} {}", method, path);

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            let body = json!({
                "status": "ok",
                "service": "portfolio-query",
                "generative": dispatcher.planner().has_generator(),
                "sessions": dispatcher.sessions().len(),
            });
            create_response(200, "OK", &body.to_string())
        }
        ("GET", "/api/templates") => {
            let templates: Vec<HashMap<&str, &str>> = dispatcher
                .planner()
                .matcher()
                .templates()
                .rules()
                .iter()
                .map(|r| {
                    HashMap::from([
                        ("id", r.id.as_str()),
                        ("description", r.description.as_str()),
                        ("example", r.example.as_str()),
                    ])
                })
                .collect();
            create_response(200, "OK", &json!({ "templates": templates }).to_string())
        }
        ("POST", "/api/chat") => match serde_json::from_str::<ChatRequest>(body) {
            Ok(req) => {
                let session_id = req
                    .session_id
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(SessionStore::new_session_id);
                let reply = dispatcher.handle(&session_id, &req.message).await;
                match serde_json::to_string(&reply) {
                    Ok(json) => create_response(200, "OK", &json),
                    Err(e) => {
                        error!("Failed to serialize reply: {}", e);
                        create_response(500, "Internal Server Error", r#"{"error":"serialization failed"}"#)
                    }
                }
            }
            Err(e) => create_response(
                400,
                "Bad Request",
                &json!({ "error": format!("invalid chat request: {}", e) }).to_string(),
            ),
        },
        ("POST", "/api/session/end") => match serde_json::from_str::<EndSessionRequest>(body) {
            Ok(req) => {
                let ended = dispatcher.end_session(&req.session_id);
                create_response(200, "OK", &json!({ "ended": ended }).to_string())
            }
            Err(e) => create_response(
                400,
                "Bad Request",
                &json!({ "error": format!("invalid request: {}", e) }).to_string(),
            ),
        },
        _ => create_response(404, "Not Found", r#"{"error":"not found"}"#),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
