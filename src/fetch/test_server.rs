//! Minimal HTTP/1.1 server for exercising clients against canned responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[derive(Default)]
struct Routes {
    /// Responses per path, served in order; the last one repeats.
    responses: HashMap<String, Vec<(u16, Vec<u8>)>>,
    hits: HashMap<String, usize>,
    requests: Vec<String>,
}

pub(crate) struct TestServer {
    base: String,
    routes: Arc<Mutex<Routes>>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes = Arc::new(Mutex::new(Routes::default()));

        let shared = routes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let shared = shared.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).await.is_err() {
                        return;
                    }
                    loop {
                        let mut line = String::new();
                        match reader.read_line(&mut line).await {
                            Ok(0) => break,
                            Ok(_) if line == "\r\n" || line == "\n" => break,
                            Ok(_) => {}
                            Err(_) => return,
                        }
                    }

                    let target = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let path = target.split('?').next().unwrap_or("/").to_string();

                    let (status, body) = {
                        let mut routes = shared.lock().unwrap();
                        routes.requests.push(target.clone());
                        let hit = {
                            let counter = routes.hits.entry(path.clone()).or_insert(0);
                            *counter += 1;
                            *counter
                        };
                        match routes.responses.get(&path) {
                            Some(list) if !list.is_empty() => list[(hit - 1).min(list.len() - 1)].clone(),
                            _ => (404, Vec::new()),
                        }
                    };

                    let head = format!(
                        "HTTP/1.1 {status} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = write.write_all(head.as_bytes()).await;
                    let _ = write.write_all(&body).await;
                    let _ = write.shutdown().await;
                });
            }
        });

        Self { base, routes }
    }

    pub(crate) fn route(self, path: &str, status: u16, body: Vec<u8>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .responses
            .entry(path.to_string())
            .or_default()
            .push((status, body));
        self
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.routes.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    /// Request targets (path and query) in arrival order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.routes.lock().unwrap().requests.clone()
    }
}
