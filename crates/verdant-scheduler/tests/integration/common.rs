//! Shared helpers for scheduler integration tests

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use verdant_core::config::ProviderEndpoint;
use verdant_scheduler::TaskRunner;

/// Mounts `GET /intensity` answering with `status` and `body`
pub async fn mount_intensity(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/intensity"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

pub fn endpoint(name: &str, server: &MockServer) -> ProviderEndpoint {
    ProviderEndpoint {
        name: name.to_string(),
        url: format!("{}/intensity", server.uri()),
        api_key: None,
    }
}

/// Runner counting its invocations
#[derive(Default)]
pub struct CountingRunner {
    pub calls: AtomicU32,
}

impl CountingRunner {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for CountingRunner {
    async fn run(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
