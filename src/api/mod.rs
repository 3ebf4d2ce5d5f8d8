//! Minimal HTTP transport.
//!
//! Serves the control surface and the live feed:
//! - `GET /health`  - liveness probe
//! - `GET /stats`   - threat stats snapshot (JSON)
//! - `GET /start?source=camera|video|image[&path=...]` - start a session
//! - `GET /stop`    - stop the active session (idempotent)
//! - `GET /feed`    - `multipart/x-mixed-replace` MJPEG stream; serves
//!   the ready frame while no session is active
//!
//! The server runs on its own thread with one handler thread per
//! connection, so a long-lived feed never starves the control routes.
//! Request parsing is intentionally minimal: GET only, no bodies.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::ingest::SourceSpec;
use crate::render::OverlayRenderer;
use crate::stream::{SharedFrameSink, StreamController};
use crate::SourceUnavailable;

const MAX_REQUEST_BYTES: usize = 8192;
/// Poll cadence while waiting for the next published frame.
const FEED_POLL: Duration = Duration::from_millis(5);
/// Refresh cadence for the idle placeholder frame.
const IDLE_REFRESH: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Device location used for `?source=camera`.
    pub camera_device: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8077".to_string(),
            camera_device: "stub://camera".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct ServerState {
    controller: Arc<StreamController>,
    sink: Arc<SharedFrameSink>,
    camera_device: String,
    ready_jpeg: Vec<u8>,
    shutdown: Arc<AtomicBool>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    controller: Arc<StreamController>,
    sink: Arc<SharedFrameSink>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        controller: Arc<StreamController>,
        sink: Arc<SharedFrameSink>,
    ) -> Self {
        Self {
            cfg,
            controller,
            sink,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let ready_jpeg = OverlayRenderer::default().ready_frame().to_jpeg(80)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(ServerState {
            controller: self.controller,
            sink: self.sink,
            camera_device: self.cfg.camera_device,
            ready_jpeg,
            shutdown: shutdown.clone(),
        });

        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("api server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = state.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state) {
                        log::warn!("api request failed: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/stats" => {
            let payload = serde_json::to_vec(&state.controller.stats())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/start" => handle_start(&mut stream, state, &request),
        "/stop" => {
            state.controller.stop()?;
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)
        }
        "/feed" => serve_feed(stream, state),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn handle_start(
    stream: &mut TcpStream,
    state: &ServerState,
    request: &HttpRequest,
) -> Result<()> {
    let spec = match request.query.get("source").map(String::as_str) {
        Some("camera") => SourceSpec::camera(state.camera_device.clone()),
        Some(kind @ ("video" | "image")) => {
            let Some(path) = request.query.get("path") else {
                write_json_response(stream, 400, r#"{"error":"missing_path"}"#)?;
                return Ok(());
            };
            if kind == "video" {
                SourceSpec::video(path.clone())
            } else {
                SourceSpec::image(path.clone())
            }
        }
        _ => {
            write_json_response(stream, 400, r#"{"error":"unknown_source"}"#)?;
            return Ok(());
        }
    };

    match state.controller.start(spec) {
        Ok(()) => write_json_response(stream, 200, r#"{"status":"ok"}"#),
        Err(err) if err.downcast_ref::<SourceUnavailable>().is_some() => {
            let body = serde_json::to_string(&serde_json::json!({
                "error": "source_unavailable",
                "detail": format!("{:#}", err),
            }))?;
            write_json_response(stream, 409, &body)
        }
        Err(err) => Err(err),
    }
}

/// Stream the MJPEG feed. Each published frame becomes one boundary part;
/// the ready frame is substituted while no session is active. Runs until
/// the client disconnects or the server shuts down.
fn serve_feed(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let header = "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;

    let mut last_sequence = 0u64;
    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        match state.sink.latest() {
            Some(frame) if frame.sequence != last_sequence => {
                last_sequence = frame.sequence;
                write_part(&mut stream, &frame.jpeg)?;
            }
            _ if !state.controller.is_active() => {
                write_part(&mut stream, &state.ready_jpeg)?;
                std::thread::sleep(IDLE_REFRESH);
            }
            _ => std::thread::sleep(FEED_POLL),
        }
    }
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    stream.write_all(&payload)?;
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let (path, query_str) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let mut query = HashMap::new();
    for pair in query_str.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            query.insert(k.to_string(), v.to_string());
        }
    }

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
}
