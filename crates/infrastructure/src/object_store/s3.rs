use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::services::S3;
use opendal::{EntryMode, ErrorKind, Operator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use tiering_domain::entities::ObjectStoreCredentials;
use tiering_domain::ports::{ObjectStoreClient, ObjectStoreClientFactory, ObjectStoreError};

/// S3 error codes that mean the key pair itself was refused.
const CREDENTIAL_CODES: [&str; 3] = [
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "InvalidToken",
];

/// Maps an opendal error to the probe taxonomy. The S3 error code carried in
/// the message separates rejected keys from a plain permission failure.
pub fn classify_opendal_error(err: &opendal::Error) -> ObjectStoreError {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::NotFound => ObjectStoreError::BucketNotFound(message),
        ErrorKind::PermissionDenied => {
            if CREDENTIAL_CODES.iter().any(|code| message.contains(code)) {
                ObjectStoreError::InvalidCredentials(message)
            } else {
                ObjectStoreError::AccessDenied(message)
            }
        }
        ErrorKind::ConfigInvalid => ObjectStoreError::Other(format!("invalid config: {message}")),
        _ => ObjectStoreError::Other(message),
    }
}

/// Lists objects through an opendal S3 operator built per bucket.
pub struct S3ListClient {
    credentials: ObjectStoreCredentials,
    request_timeout: Duration,
}

impl S3ListClient {
    pub fn new(
        credentials: ObjectStoreCredentials,
        request_timeout: Duration,
    ) -> Result<Self, ObjectStoreError> {
        let endpoint = credentials.endpoint.as_str();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ObjectStoreError::Other(format!(
                "invalid endpoint: {endpoint}"
            )));
        }
        Ok(Self {
            credentials,
            request_timeout,
        })
    }

    fn operator(&self, bucket: &str) -> Result<Operator, ObjectStoreError> {
        // 只使用显式凭据，不读取环境变量或实例元数据
        let builder = S3::default()
            .endpoint(&self.credentials.endpoint)
            .bucket(bucket)
            .region(&self.credentials.region)
            .access_key_id(&self.credentials.access_key_id)
            .secret_access_key(&self.credentials.secret_access_key)
            .disable_config_load()
            .disable_ec2_metadata();

        Ok(Operator::new(builder)
            .map_err(|e| classify_opendal_error(&e))?
            .finish())
    }

    async fn first_keys(
        &self,
        bucket: &str,
        max_keys: u32,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let operator = self.operator(bucket)?;
        let wanted = max_keys as usize;

        let mut lister = operator
            .lister_with("/")
            .recursive(true)
            .limit(wanted.max(1))
            .await
            .map_err(|e| classify_opendal_error(&e))?;

        let mut keys = Vec::with_capacity(wanted);
        while keys.len() < wanted {
            match lister
                .try_next()
                .await
                .map_err(|e| classify_opendal_error(&e))?
            {
                Some(entry) if entry.metadata().mode() == EntryMode::FILE => {
                    keys.push(entry.path().to_string());
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStoreClient for S3ListClient {
    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        max_keys: u32,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let listing = self.first_keys(bucket, max_keys);
        match tokio::time::timeout(self.request_timeout, listing).await {
            Ok(Ok(keys)) => Ok(keys),
            Ok(Err(e)) => {
                debug!("List on bucket {} failed: {}", bucket, e);
                Err(e)
            }
            Err(_) => Err(ObjectStoreError::Other(format!(
                "list timed out after {:?}",
                self.request_timeout
            ))),
        }
    }
}

/// Builds an [`S3ListClient`] per credential set.
#[derive(Debug, Clone)]
pub struct S3ClientFactory {
    request_timeout: Duration,
}

impl S3ClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ObjectStoreClientFactory for S3ClientFactory {
    fn create(
        &self,
        credentials: &ObjectStoreCredentials,
    ) -> Result<Arc<dyn ObjectStoreClient>, ObjectStoreError> {
        Ok(Arc::new(S3ListClient::new(
            credentials.clone(),
            self.request_timeout,
        )?))
    }
}
