//! AWS SDK client bundle sharing one loaded [`aws_config::SdkConfig`].

use aws_config::BehaviorVersion;

/// KMS and S3 clients built from the same SDK configuration.
///
/// Both clients share credentials resolved once at startup.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// KMS client used by [`crate::materials::KmsMaterials`].
    pub kms: aws_sdk_kms::Client,
    /// S3 client used by [`crate::storage::S3Store`].
    pub s3: aws_sdk_s3::Client,
}

impl AwsClients {
    /// Load the SDK configuration and build both clients.
    ///
    /// With `s3_endpoint_url` set, S3 requests go to that endpoint using
    /// path-style addressing. KMS always uses the regional endpoint.
    pub async fn init(s3_endpoint_url: Option<&str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let kms = aws_sdk_kms::Client::new(&config);

        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
        if let Some(endpoint) = s3_endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let s3 = aws_sdk_s3::Client::from_conf(s3_config.build());

        Self { kms, s3 }
    }
}
