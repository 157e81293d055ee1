use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use bytes::Bytes;
use sitemaps_storage::backends::s3::S3Backend;
use sitemaps_storage::traits::{ObjectStore, PutOptions};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};

const MINIO_IMAGE: &str = "minio/minio";
const MINIO_TAG: &str = "RELEASE.2024-02-12T21-36-45Z";
const BUCKET: &str = "sitemaps-test";

fn should_skip_s3_tests() -> bool {
    std::env::var("SKIP_S3_TESTS").is_ok()
}

struct MinioContext {
    _container: ContainerAsync<GenericImage>,
    endpoint: String,
    access_key: String,
    secret_key: String,
}

impl MinioContext {
    async fn new() -> Result<Self, String> {
        let access_key = "minio-access-key".to_string();
        let secret_key = "minio-secret-key".to_string();

        let container: ContainerAsync<GenericImage> = GenericImage::new(MINIO_IMAGE, MINIO_TAG)
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("API:"))
            .with_env_var("MINIO_ROOT_USER", access_key.clone())
            .with_env_var("MINIO_ROOT_PASSWORD", secret_key.clone())
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .map_err(|e| format!("failed to start MinIO container: {e}"))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| format!("failed to get host: {e}"))?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .map_err(|e| format!("failed to get port: {e}"))?;

        Ok(Self {
            _container: container,
            endpoint: format!("http://{host}:{port}"),
            access_key,
            secret_key,
        })
    }

    async fn create_bucket(&self) -> Result<(), String> {
        let credentials = Credentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            None,
            None,
            "test",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .endpoint_url(self.endpoint.clone())
            .force_path_style(true)
            .build();

        Client::from_conf(config)
            .create_bucket()
            .bucket(BUCKET)
            .send()
            .await
            .map_err(|e| format!("failed to create bucket: {e}"))?;
        Ok(())
    }

    async fn backend(&self, prefix: Option<&str>) -> Result<S3Backend, String> {
        S3Backend::new(
            BUCKET,
            Some(self.endpoint.clone()),
            Some("us-east-1".to_string()),
            prefix.map(str::to_string),
            Some(self.access_key.clone()),
            Some(self.secret_key.clone()),
            true,
        )
        .await
        .map_err(|e| format!("failed to create S3 backend: {e}"))
    }
}

async fn start() -> Option<(MinioContext, S3Backend)> {
    if should_skip_s3_tests() {
        return None;
    }
    let context = match MinioContext::new().await {
        Ok(context) => context,
        Err(err) => {
            eprintln!("Skipping S3 test: {err}");
            return None;
        }
    };
    if let Err(err) = context.create_bucket().await {
        eprintln!("Skipping S3 test: {err}");
        return None;
    }
    let backend = context.backend(Some("prefix")).await.ok()?;
    Some((context, backend))
}

#[tokio::test]
async fn test_s3_put_records_content_headers() {
    let Some((_context, backend)) = start().await else {
        return;
    };

    let key = "video-sitemaps/video-sitemap-10-3-1";
    backend
        .put(key, Bytes::from_static(b"\x1f\x8bpayload"), &PutOptions::gzip_xml())
        .await
        .unwrap();

    let meta = backend.head(key).await.unwrap();
    assert_eq!(meta.size, 9);
    assert_eq!(meta.content_type.as_deref(), Some("application/xml"));
    assert_eq!(meta.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(
        backend.get(key).await.unwrap(),
        Bytes::from_static(b"\x1f\x8bpayload")
    );

    backend.health_check().await.unwrap();
}

#[tokio::test]
async fn test_s3_missing_objects_and_delete() {
    let Some((_context, backend)) = start().await else {
        return;
    };

    assert!(!backend.exists("robots.txt").await.unwrap());
    assert!(backend.get("robots.txt").await.unwrap_err().is_not_found());
    assert!(backend.delete("robots.txt").await.unwrap_err().is_not_found());

    backend
        .put(
            "robots.txt",
            Bytes::from_static(b"User-agent: *\nAllow: /"),
            &PutOptions::plain_text(),
        )
        .await
        .unwrap();
    assert!(backend.exists("robots.txt").await.unwrap());
    backend.delete("robots.txt").await.unwrap();
    assert!(!backend.exists("robots.txt").await.unwrap());
}
