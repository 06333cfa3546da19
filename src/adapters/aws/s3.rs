use crate::config::StoreConfig;
use crate::ports::storage::{ObjectMeta, ObjectStore, StoreError};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

/// S3Adapter implements ObjectStore for AWS S3 and S3-compatible stores such as MinIO.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3Adapter {
    pub fn new(client: Client, bucket: String, public_base: String) -> Self {
        Self {
            client,
            bucket,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    /// Build a path-style client with static credentials.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "hlsforge-static",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Self::new(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            config.public_base(),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn classify(err: SdkError<PutObjectError, HttpResponse>) -> StoreError {
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(message)
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            if status == 429 || status >= 500 {
                StoreError::Transient(message)
            } else {
                StoreError::Rejected(message)
            }
        }
        _ => StoreError::Rejected(message),
    }
}

#[async_trait]
impl ObjectStore for S3Adapter {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(meta.content_type)
            .set_cache_control(meta.cache_control.map(str::to_string))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}
