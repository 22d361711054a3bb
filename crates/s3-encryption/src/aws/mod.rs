//! AWS SDK client initialisation for KMS and S3.
//!
//! Credentials and region come from the standard AWS provider chain. An
//! endpoint override points S3 at a compatible service such as MinIO or
//! LocalStack.

pub mod clients;

pub use clients::AwsClients;
