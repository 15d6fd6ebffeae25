//! In-process HTTP server for exercising the REST and download paths in tests.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use tiny_http::{Header, Response, Server, StatusCode};

pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

pub struct FakeResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Send without a Content-Length header.
    pub chunked: bool,
}

pub fn json_response(status: u16, body: &str) -> FakeResponse {
    FakeResponse {
        status,
        content_type: "application/json",
        body: body.as_bytes().to_vec(),
        chunked: false,
    }
}

pub fn bytes_response(body: Vec<u8>, chunked: bool) -> FakeResponse {
    FakeResponse {
        status: 200,
        content_type: "video/mp4",
        body,
        chunked,
    }
}

pub struct FakeServer {
    server: Arc<Server>,
    base_url: String,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> FakeResponse + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind fake server"));
        let base_url = format!("http://{}", server.server_addr());
        let worker = server.clone();
        let handle = thread::spawn(move || {
            for mut request in worker.incoming_requests() {
                let mut body = Vec::new();
                let _ = request.as_reader().read_to_end(&mut body);
                let header = |name: &str| {
                    request
                        .headers()
                        .iter()
                        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                        .map(|h| h.value.as_str().to_string())
                };
                let recorded = RecordedRequest {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    authorization: header("Authorization"),
                    content_type: header("Content-Type"),
                    body,
                };
                let reply = handler(&recorded);
                let content_type =
                    Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes())
                        .expect("content type header");
                let length = if reply.chunked {
                    None
                } else {
                    Some(reply.body.len())
                };
                let mut response = Response::new(
                    StatusCode(reply.status),
                    vec![content_type],
                    Cursor::new(reply.body),
                    length,
                    None,
                );
                if !reply.chunked {
                    response = response.with_chunked_threshold(usize::MAX);
                }
                let _ = request.respond(response);
            }
        });
        FakeServer {
            server,
            base_url,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
