//! Crawler notification after a leaf file changes.

use async_trait::async_trait;
use reqwest::Url;
use sitemaps_core::config::NotifyConfig;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid ping url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crawler responded with status {0}")]
    Status(u16),
}

/// Tells crawlers a sitemap changed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, sitemap_link: &str) -> Result<(), NotifyError>;
}

/// Notifier that does nothing.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _sitemap_link: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Sends `GET {ping_url}{link}` with the link URL-encoded.
#[derive(Debug)]
pub struct HttpPingNotifier {
    client: reqwest::Client,
    ping_url: Url,
}

impl HttpPingNotifier {
    pub fn new(ping_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let ping_url =
            Url::parse(ping_url).map_err(|e| NotifyError::InvalidUrl(format!("{ping_url}: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, ping_url })
    }

    /// The ping URL with the link filled into its empty query parameter,
    /// or appended as `sitemap=` when there is none.
    pub fn ping_target(&self, sitemap_link: &str) -> Url {
        let pairs: Vec<(String, String)> = self.ping_url.query_pairs().into_owned().collect();
        let mut url = self.ping_url.clone();
        let mut filled = false;
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &pairs {
                if value.is_empty() && !filled {
                    query.append_pair(key, sitemap_link);
                    filled = true;
                } else {
                    query.append_pair(key, value);
                }
            }
            if !filled {
                query.append_pair("sitemap", sitemap_link);
            }
        }
        url
    }
}

#[async_trait]
impl Notifier for HttpPingNotifier {
    async fn notify(&self, sitemap_link: &str) -> Result<(), NotifyError> {
        let response = self.client.get(self.ping_target(sitemap_link)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Build the notifier described by `config`.
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if !config.enabled {
        return Ok(Arc::new(NoopNotifier));
    }
    let notifier =
        HttpPingNotifier::new(&config.ping_url, Duration::from_secs(config.timeout_secs))?;
    Ok(Arc::new(notifier))
}

/// Notify and log the outcome. Failures never propagate.
pub async fn notify_best_effort(notifier: &dyn Notifier, sitemap_link: &str) {
    match notifier.notify(sitemap_link).await {
        Ok(()) => {
            crate::metrics::NOTIFICATIONS.with_label_values(&["ok"]).inc();
            tracing::debug!(sitemap = %sitemap_link, "Crawler notified");
        }
        Err(e) => {
            crate::metrics::NOTIFICATIONS.with_label_values(&["failed"]).inc();
            tracing::warn!(sitemap = %sitemap_link, error = %e, "Crawler notification failed");
        }
    }
}
