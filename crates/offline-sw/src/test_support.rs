//! In-memory fetcher for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use offline_net::{Fetcher, NetError, Request, Response};
use url::Url;

/// Serves canned responses by URL and counts every request.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, Response>>,
    calls: Mutex<HashMap<String, usize>>,
    delays: Mutex<VecDeque<Duration>>,
    offline: AtomicBool,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, status: StatusCode, body: &'static str) {
        let url = Url::parse(url).unwrap();
        self.route_response(Response::new(url, status, body));
    }

    pub fn route_response(&self, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(response.url.to_string(), response);
    }

    pub fn unroute(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    /// Delay the next fetches, one entry per call in call order.
    pub fn set_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        *self.delays.lock().unwrap() = delays.into_iter().collect();
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.to_string();
        *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;

        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(format!("{url}: offline")));
        }
        self.routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or_else(|| NetError::RequestFailed(format!("{url}: connection refused")))
    }
}
