//! S3-compatible object store sink.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use super::{Sink, basename};
use crate::error::{Error, Result};
use crate::transform::{Artifact, Scratch};

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO and other S3-compatible stores.
    pub endpoint: Option<String>,
    pub path_style: bool,
    /// Static credentials. When absent the default AWS provider chain is
    /// used.
    pub access_key: Option<SecretString>,
    pub secret_key: Option<SecretString>,
}

#[derive(Clone)]
pub struct S3Sink {
    client: Client,
    bucket: String,
}

impl S3Sink {
    pub async fn new(settings: S3Settings) -> Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.path_style);

        match (&settings.access_key, &settings.secret_key) {
            (Some(access), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access.expose_secret(),
                    secret.expose_secret(),
                    None,
                    None,
                    "stageq",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "S3 access key and secret key must be set together".to_string(),
                ));
            }
        }

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %settings.bucket, "S3 client initialized");

        Ok(Self::from_client(Client::from_conf(builder.build()), settings.bucket))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait::async_trait]
impl Sink for S3Sink {
    fn kind(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, artifact), fields(bucket = %self.bucket))]
    async fn put(&self, key: &str, artifact: &Artifact) -> Result<()> {
        let body = ByteStream::from_path(artifact.path())
            .await
            .map_err(|e| Error::transport("s3", format!("cannot read {}: {e}", artifact.name())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::transport("s3", format!("put {key} failed: {}", DisplayErrorContext(&e)))
            })?;

        info!("uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self, scratch), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str, scratch: &Scratch) -> Result<Artifact> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::transport("s3", format!("get {key} failed: {}", DisplayErrorContext(&e)))
            })?;

        let artifact = Artifact::create(scratch, basename(key))?;
        let mut file = tokio::fs::File::create(artifact.path()).await?;
        let mut body = response.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::transport("s3", format!("reading {key}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!("downloaded s3://{}/{}", self.bucket, key);
        Ok(artifact)
    }
}
