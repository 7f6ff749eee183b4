//! Fixtures shared by the pipeline, store, and reconcile tests.
//!
//! One mock server stands in for all three services, each under its own
//! path prefix: `/hibp/`, `/es/`, `/netbox/`.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use breachwatch_shared::{AppConfig, Credentials, RetryConfig, StoreCredentials};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("bw_core_test_{}.db", Uuid::now_v7()))
}

/// Config pointing every service at `server` and the log at a fresh temp file.
pub(crate) fn test_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.path = temp_db_path().to_string_lossy().into_owned();
    config.search.url = format!("{}/es", server.uri());
    config.breach_source.base_url = format!("{}/hibp/", server.uri());
    config.inventory.base_url = format!("{}/netbox/", server.uri());
    config.retry = RetryConfig {
        max_attempts: 3,
        delay_ms: 0,
    };
    config
}

pub(crate) fn test_credentials() -> Credentials {
    Credentials {
        breach_api_key: "hibp-test".into(),
        inventory_token: "netbox-test".into(),
        store: StoreCredentials::default(),
    }
}

/// Answer the index existence check with 200.
pub(crate) async fn mount_existing_index(server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/es/breaches"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Formatted log output captured from the current thread.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's events here until the guard drops.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// ERROR lines containing `needle`.
    pub(crate) fn errors_mentioning(&self, needle: &str) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains("ERROR") && line.contains(needle))
            .map(String::from)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
