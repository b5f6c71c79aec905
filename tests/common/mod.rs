//! Shared fixtures: a mock storage service and a client pointed at it.

#![allow(dead_code)]

use cloud_vision_sync_lib::{
    CloudVision, CompilerKind, ModelCompiler, PassthroughCompiler, SyncConfig, SyncError, SyncResult,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_KEY: &str = "test-api-key";
pub const TOKEN: &str = "test-token";
pub const BEARER: &str = "bearer test-token";

pub const CURRENT: &str = "Wed, 21 Oct 2015 07:28:00 GMT";
pub const OLDER: &str = "Sat, 01 Jan 2000 00:00:00 GMT";
pub const NEWER: &str = "Thursday, 22 Oct 2015 09:00:00 GMT";

pub struct Fixture {
    pub server: MockServer,
    pub data_dir: TempDir,
    pub scratch_dir: TempDir,
}

impl Fixture {
    /// Mock server with a working token endpoint.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oidc/token"))
            .and(query_param("apikey", API_KEY))
            .and(query_param("response_type", "cloud_iam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": TOKEN,
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        Self {
            server,
            data_dir: tempfile::tempdir().expect("data dir"),
            scratch_dir: tempfile::tempdir().expect("scratch dir"),
        }
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            endpoint: self.server.uri(),
            iam_url: format!("{}/oidc/token", self.server.uri()),
            api_key: API_KEY.to_string(),
            resource_instance_id: "crn:test".to_string(),
            data_dir: Some(self.data_dir.path().to_path_buf()),
            scratch_dir: Some(self.scratch_dir.path().to_path_buf()),
            compiler: CompilerKind::Passthrough,
            ..SyncConfig::default()
        }
    }

    pub fn client(&self) -> Arc<CloudVision> {
        Arc::new(CloudVision::new(self.config()).expect("client"))
    }

    pub fn client_with(&self, compiler: Arc<dyn ModelCompiler>) -> Arc<CloudVision> {
        Arc::new(CloudVision::with_compiler(self.config(), compiler).expect("client"))
    }

    pub fn installed(&self, bucket: &str) -> PathBuf {
        self.data_dir.path().join(format!("{}.mlmodelc", bucket))
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch_dir.path())
            .expect("read scratch")
            .next()
            .is_none()
    }
}

/// Always fails, leaving its output directory untouched.
pub struct FailingCompiler;

impl ModelCompiler for FailingCompiler {
    fn compile(&self, _source: &Path, _output_dir: &Path) -> SyncResult<PathBuf> {
        Err(SyncError::Compilation("simulated compiler failure".to_string()))
    }
}

/// Passthrough compile that takes `delay` and records how many ran at once.
pub struct SlowCompiler {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowCompiler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl ModelCompiler for SlowCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> SyncResult<PathBuf> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = PassthroughCompiler.compile(source, output_dir);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn listing(names: &[&str]) -> String {
    let buckets: String = names
        .iter()
        .map(|n| {
            format!(
                "<Bucket><Name>{}</Name><CreationDate>2018-05-01T12:00:00.000Z</CreationDate></Bucket>",
                n
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>owner</ID><DisplayName>owner</DisplayName></Owner>
  <Buckets>{}</Buckets>
</ListAllMyBucketsResult>"#,
        buckets
    )
}
