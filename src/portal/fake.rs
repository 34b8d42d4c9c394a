//! Scripted in-memory transport for tests

use crate::config::PortalSettings;
use crate::error::{PortalError, PortalResult};
use crate::http::{ChunkSource, PortalResponse, Transport};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE: &str = "https://selfcare.test";

#[derive(Debug, Clone)]
pub enum Reply {
    Page {
        final_path: String,
        status: u16,
        body: String,
    },
    Refused,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(Vec<u8>),
    /// Server closes the body
    End,
    /// Connection stays open with nothing to read
    Pending,
    /// Nothing to read for a while, then the next event
    Delay(Duration),
    Error,
}

impl StreamEvent {
    pub fn chunk(text: &str) -> Self {
        StreamEvent::Chunk(text.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub url: String,
    pub headers: HeaderMap,
    pub form: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    streams: Mutex<VecDeque<Option<Vec<StreamEvent>>>>,
    requests: Mutex<Vec<Recorded>>,
    open: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn portal(&self) -> PortalSettings {
        PortalSettings {
            base_url: BASE.to_string(),
            ..PortalSettings::default()
        }
    }

    /// Queue a reply for `path`; the last queued reply repeats
    pub fn reply(&self, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{}{}", BASE, path))
            .or_default()
            .push_back(reply);
    }

    pub fn page(&self, path: &str, body: &str) {
        self.redirect(path, path, body);
    }

    pub fn redirect(&self, path: &str, final_path: &str, body: &str) {
        self.reply(
            path,
            Reply::Page {
                final_path: final_path.to_string(),
                status: 200,
                body: body.to_string(),
            },
        );
    }

    pub fn status(&self, path: &str, status: u16, body: &str) {
        self.reply(
            path,
            Reply::Page {
                final_path: path.to_string(),
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn refuse(&self, path: &str) {
        self.reply(path, Reply::Refused);
    }

    pub fn stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().unwrap().push_back(Some(events));
    }

    pub fn stream_failure(&self) {
        self.streams.lock().unwrap().push_back(None);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.url.trim_start_matches(BASE).to_string())
            .collect()
    }

    /// Stream sources handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn record(&self, method: &'static str, url: &str, headers: HeaderMap, form: &[(&str, &str)]) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            url: url.to_string(),
            headers,
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    fn respond(&self, url: &str) -> PortalResult<PortalResponse> {
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            let queue = routes.get_mut(url);
            match queue {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Page {
                final_path,
                status,
                body,
            }) => Ok(PortalResponse {
                final_url: Url::parse(&format!("{}{}", BASE, final_path)).unwrap(),
                status,
                body,
            }),
            Some(Reply::Refused) => Err(refused()),
            None => Err(PortalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no scripted reply for {}", url),
            ))),
        }
    }
}

fn refused() -> PortalError {
    PortalError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, headers: HeaderMap) -> PortalResult<PortalResponse> {
        self.record("GET", url, headers, &[]);
        self.respond(url)
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> PortalResult<PortalResponse> {
        self.record("POST", url, headers, form);
        self.respond(url)
    }

    async fn open_stream(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> PortalResult<Box<dyn ChunkSource>> {
        self.record("GET", url, headers, &[]);
        let script = self.streams.lock().unwrap().pop_front();

        match script {
            Some(Some(events)) => {
                self.open.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedSource {
                    events: events.into(),
                    open: self.open.clone(),
                }))
            }
            _ => Err(refused()),
        }
    }
}

struct ScriptedSource {
    events: VecDeque<StreamEvent>,
    open: Arc<AtomicUsize>,
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> PortalResult<Option<Vec<u8>>> {
        // Popped only once the wait completes, so a reader that gives up
        // early sees the same gap again
        while let Some(&StreamEvent::Delay(wait)) = self.events.front() {
            tokio::time::sleep(wait).await;
            self.events.pop_front();
        }

        let event = self.events.pop_front().unwrap_or(StreamEvent::End);
        match event {
            StreamEvent::Chunk(bytes) => Ok(Some(bytes)),
            StreamEvent::End => Ok(None),
            StreamEvent::Error => Err(PortalError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))),
            StreamEvent::Pending => {
                self.events.push_front(StreamEvent::Pending);
                std::future::pending().await
            }
            StreamEvent::Delay(_) => unreachable!("delays are consumed above"),
        }
    }
}
