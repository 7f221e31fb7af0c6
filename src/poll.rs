//! Fulfillment request and polling until staged downloads carry URLs.
use crate::api::types::{ApiKey, DownloadRequestBody, DownloadRequestItem, RemoteDownload};
use crate::api::M2mApi;
use crate::config::PollPolicy;
use crate::error::M2mError;
use chrono::Local;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A staged download that is ready to fetch. Always carries a non-empty URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    pub url: String,
    pub entity_id: Option<String>,
    pub file_name: Option<String>,
}

impl DownloadItem {
    pub fn from_remote(remote: RemoteDownload) -> Option<Self> {
        let url = remote.url.filter(|url| !url.trim().is_empty())?;
        Some(Self {
            url,
            entity_id: remote.entity_id,
            file_name: remote.file_name.filter(|name| !name.is_empty()),
        })
    }
}

/// Label tagging one fulfillment request, e.g. `20220131_154500`.
pub fn run_label() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Default)]
struct Available {
    items: Vec<DownloadItem>,
    seen: HashSet<String>,
}

impl Available {
    /// Returns how many previously unseen downloads were added.
    fn extend(&mut self, downloads: Vec<RemoteDownload>) -> usize {
        let before = self.items.len();
        for remote in downloads {
            let Some(item) = DownloadItem::from_remote(remote) else {
                debug!("Skipping staged download without URL");
                continue;
            };
            if self.seen.insert(item.url.clone()) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }
}

/// Submits `requested` under `label` and polls `download-retrieve` while anything is still preparing.
///
/// Only the submission itself can fail. Items still pending once the attempts
/// run out are left behind and whatever became available is returned.
pub async fn resolve_availability(
    api: &impl M2mApi,
    api_key: &ApiKey,
    requested: Vec<DownloadRequestItem>,
    label: &str,
    policy: &PollPolicy,
) -> Result<Vec<DownloadItem>, M2mError> {
    let total = requested.len();
    let body = DownloadRequestBody {
        downloads: requested,
        label: label.to_string(),
    };
    let response = api.download_request(api_key, &body).await?;
    info!(
        label,
        available = response.available_downloads.len(),
        preparing = response.preparing_downloads.len(),
        "Download request submitted"
    );

    let mut available = Available::default();
    available.extend(response.available_downloads);

    if response.preparing_downloads.is_empty() {
        return Ok(available.items);
    }

    for attempt in 1..=policy.max_attempts {
        match api.download_retrieve(api_key, label).await {
            Ok(retrieved) if !retrieved.available.is_empty() => {
                let added = available.extend(retrieved.available);
                info!(attempt, added, total = available.items.len(), "Retrieved download URLs");
                if available.items.len() >= total {
                    break;
                }
            }
            Ok(_) => info!(attempt, "No download URLs retrieved yet"),
            Err(e) => warn!(attempt, error = %e, "Download-retrieve attempt failed"),
        }
        if attempt < policy.max_attempts {
            debug!(attempt, max_attempts = policy.max_attempts, "Waiting {:?}", policy.interval);
            tokio::time::sleep(policy.interval).await;
        }
    }

    if available.items.len() < total {
        warn!(
            available = available.items.len(),
            requested = total,
            "Proceeding without downloads that never became available"
        );
    }
    Ok(available.items)
}
