//! Deletion of externally hosted attachments (images and files uploaded by
//! clients straight to object storage). The relay only ever needs to delete
//! them, in bulk, when a room is purged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AttachmentsSection;
use crate::db::models::MessageKind;

/// Cloudinary accepts at most this many public ids per delete call.
const MAX_IDS_PER_REQUEST: usize = 100;

/// An uploaded attachment referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub public_id: String,
    pub kind: MessageKind,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("attachment store rejected deletion ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// External object storage holding message attachments.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Request deletion of a batch of attachments. Best effort: callers log
    /// failures and carry on.
    async fn delete_batch(&self, refs: &[AttachmentRef]) -> Result<(), AttachmentError>;
}

/// Used when no object storage is configured.
#[derive(Debug, Default)]
pub struct DisabledStore;

#[async_trait]
impl AttachmentStore for DisabledStore {
    async fn delete_batch(&self, refs: &[AttachmentRef]) -> Result<(), AttachmentError> {
        if !refs.is_empty() {
            info!(count = refs.len(), "attachment storage not configured, skipping deletion");
        }
        Ok(())
    }
}

/// Credentials for the Cloudinary admin API.
#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Deletes uploads through the Cloudinary admin API.
pub struct CloudinaryStore {
    client: reqwest::Client,
    base_url: String,
    credentials: CloudinaryCredentials,
}

impl CloudinaryStore {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.cloudinary.com";

    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> Result<Self, AttachmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            credentials,
        })
    }

    /// Point the client at another API host (tests, regional endpoints).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Images were uploaded as `image` resources, everything else as `raw`.
    fn resource_type(kind: MessageKind) -> &'static str {
        match kind {
            MessageKind::Image => "image",
            MessageKind::File | MessageKind::Text => "raw",
        }
    }

    async fn delete_ids(&self, resource_type: &str, ids: &[&str]) -> Result<(), AttachmentError> {
        let url = format!(
            "{}/v1_1/{}/resources/{}/upload",
            self.base_url, self.credentials.cloud_name, resource_type
        );
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("public_ids[]", *id)).collect();

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttachmentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for CloudinaryStore {
    async fn delete_batch(&self, refs: &[AttachmentRef]) -> Result<(), AttachmentError> {
        let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for r in refs {
            by_type
                .entry(Self::resource_type(r.kind))
                .or_default()
                .push(r.public_id.as_str());
        }

        // Keep going after a failed chunk; report the first failure.
        let mut first_error = None;
        for (resource_type, ids) in &by_type {
            for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
                if let Err(e) = self.delete_ids(resource_type, chunk).await {
                    warn!(resource_type, count = chunk.len(), error = %e, "attachment deletion failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the attachment store described by the configuration.
pub fn from_config(section: &AttachmentsSection) -> Result<Arc<dyn AttachmentStore>, AttachmentError> {
    match section.credentials() {
        Some(credentials) => {
            info!(cloud_name = %credentials.cloud_name, "attachment deletion via Cloudinary enabled");
            let store = CloudinaryStore::new(credentials, section.request_timeout())?;
            Ok(Arc::new(store))
        }
        None => {
            info!("no attachment storage configured");
            Ok(Arc::new(DisabledStore))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every batch it is asked to delete; optionally fails.
    #[derive(Default)]
    pub struct RecordingStore {
        pub batches: Mutex<Vec<Vec<AttachmentRef>>>,
        pub fail: bool,
    }

    impl RecordingStore {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn batches(&self) -> Vec<Vec<AttachmentRef>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AttachmentStore for RecordingStore {
        async fn delete_batch(&self, refs: &[AttachmentRef]) -> Result<(), AttachmentError> {
            self.batches.lock().unwrap().push(refs.to_vec());
            if self.fail {
                return Err(AttachmentError::Rejected {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> CloudinaryStore {
        CloudinaryStore::new(
            CloudinaryCredentials {
                cloud_name: "demo".into(),
                api_key: "key".into(),
                api_secret: "secret".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
        .with_base_url(server.uri())
    }

    fn attachment(public_id: &str, kind: MessageKind) -> AttachmentRef {
        AttachmentRef {
            public_id: public_id.into(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_deletes_images_and_files_by_resource_type() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/image/upload"))
            .and(basic_auth("key", "secret"))
            .and(query_param("public_ids[]", "hall/cat"))
            .and(query_param("public_ids[]", "hall/dog"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"deleted":{}}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/raw/upload"))
            .and(query_param("public_ids[]", "hall/report"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .delete_batch(&[
                attachment("hall/cat", MessageKind::Image),
                attachment("hall/report", MessageKind::File),
                attachment("hall/dog", MessageKind::Image),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_large_batches_are_chunked() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/image/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let refs: Vec<_> = (0..250)
            .map(|i| attachment(&format!("hall/{i}"), MessageKind::Image))
            .collect();
        store(&server).delete_batch(&refs).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = store(&server)
            .delete_batch(&[attachment("hall/cat", MessageKind::Image)])
            .await
            .unwrap_err();
        match err {
            AttachmentError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_in_one_group_still_attempts_others() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/image/upload"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/raw/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = store(&server)
            .delete_batch(&[
                attachment("hall/cat", MessageKind::Image),
                attachment("hall/report", MessageKind::File),
            ])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_store_succeeds() {
        DisabledStore
            .delete_batch(&[attachment("hall/cat", MessageKind::Image)])
            .await
            .unwrap();
    }
}
