//! [`S3Store`]: the [`ObjectStore`] backed by `aws-sdk-s3`.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use common::{TransportError, TransportErrorKind};
use tracing::debug;

use super::{Metadata, ObjectStore, PutResult, StoredObject};

/// S3 bucket accessed through an SDK client.
#[derive(Clone, Debug)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutResult, TransportError> {
        let size = body.len();
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| transport_error("put", key, e))?;

        debug!(bucket = %self.bucket, key, bytes = size, "object uploaded");
        Ok(PutResult {
            e_tag: out.e_tag().map(str::to_owned),
            version_id: out.version_id().map(str::to_owned),
        })
    }

    async fn get_object(&self, key: &str) -> Result<StoredObject, TransportError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transport_error("get", key, e))?;

        let metadata = out.metadata().cloned().unwrap_or_default();
        let e_tag = out.e_tag().map(str::to_owned);
        let content_length = out.content_length().and_then(|l| u64::try_from(l).ok());
        debug!(bucket = %self.bucket, key, "object opened");

        Ok(StoredObject {
            body: Box::new(out.body.into_async_read()),
            metadata,
            e_tag,
            content_length,
        })
    }
}

/// Map an SDK failure onto the transport error taxonomy.
fn transport_error<E>(op: &str, key: &str, err: SdkError<E>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => TransportErrorKind::Network,
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            classify(ctx.err().code(), status)
        }
        SdkError::ResponseError(_) => TransportErrorKind::Network,
        _ => TransportErrorKind::Service,
    };
    TransportError::new(kind, format!("{op} `{key}` failed: {}", DisplayErrorContext(&err)))
}

fn classify(code: Option<&str>, status: u16) -> TransportErrorKind {
    match code {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => TransportErrorKind::NotFound,
        Some("AccessDenied")
        | Some("InvalidAccessKeyId")
        | Some("SignatureDoesNotMatch")
        | Some("ExpiredToken")
        | Some("InvalidToken") => TransportErrorKind::Auth,
        Some("SlowDown") | Some("Throttling") | Some("ThrottlingException")
        | Some("RequestLimitExceeded") => TransportErrorKind::Throttling,
        _ => match status {
            404 => TransportErrorKind::NotFound,
            401 | 403 => TransportErrorKind::Auth,
            429 | 503 => TransportErrorKind::Throttling,
            _ => TransportErrorKind::Service,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_error_code() {
        assert_eq!(classify(Some("NoSuchKey"), 404), TransportErrorKind::NotFound);
        assert_eq!(classify(Some("AccessDenied"), 403), TransportErrorKind::Auth);
        assert_eq!(classify(Some("SlowDown"), 503), TransportErrorKind::Throttling);
        assert_eq!(classify(Some("InternalError"), 500), TransportErrorKind::Service);
    }

    #[test]
    fn classify_falls_back_to_status() {
        // HEAD-style responses carry no error code.
        assert_eq!(classify(None, 404), TransportErrorKind::NotFound);
        assert_eq!(classify(None, 403), TransportErrorKind::Auth);
        assert_eq!(classify(None, 429), TransportErrorKind::Throttling);
        assert_eq!(classify(None, 500), TransportErrorKind::Service);
    }
}
