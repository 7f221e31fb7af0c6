use crate::config::RetrievalOptions;
use crate::extract::{extract_and_cleanup, BUNDLE_SUFFIX};
use crate::fetch::Fetch;
use crate::poll::DownloadItem;
use crate::resolve::ProductSelection;
use anyhow::Result;
use futures_util::future::join_all;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub entity_id: Option<String>,
    pub output: PathBuf,
    /// Set for bundle archives, which are unpacked here once downloaded.
    pub extract_to: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    /// Derives a local file for every item; items that cannot be named are dropped.
    pub fn build(
        items: &[DownloadItem],
        output_dir: &Path,
        selection: &ProductSelection,
        display_ids: &HashMap<String, String>,
    ) -> Self {
        let tasks = items
            .iter()
            .filter_map(|item| {
                let Some(file_name) = file_name_for(item, selection, display_ids) else {
                    warn!(url = %item.url, "Unable to derive a file name, skipping");
                    return None;
                };
                let extract_to = (selection.is_bundle() && file_name.ends_with(BUNDLE_SUFFIX))
                    .then(|| output_dir.join(extract_dir_name(item, &file_name, display_ids)));
                Some(DownloadTask {
                    url: item.url.clone(),
                    entity_id: item.entity_id.clone(),
                    output: output_dir.join(file_name),
                    extract_to,
                })
            })
            .collect();
        Self { tasks }
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub async fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Runs every task with at most `max_concurrency` transfers in flight and
    /// waits for all of them. A failed task is logged and left out of the
    /// returned paths; it never stops its siblings.
    pub async fn execute(&self, fetcher: &impl Fetch, options: &RetrievalOptions) -> Vec<PathBuf> {
        let semaphore = Semaphore::new(options.max_concurrency.max(1));

        let downloads = self.tasks.iter().map(|task| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };
                run_task(fetcher, task, options).await
            }
        });

        join_all(downloads).await.into_iter().flatten().collect()
    }
}

async fn run_task(
    fetcher: &impl Fetch,
    task: &DownloadTask,
    options: &RetrievalOptions,
) -> Option<PathBuf> {
    let result = tokio::time::timeout(options.item_timeout, try_download(fetcher, task)).await;
    let error = match result {
        Ok(Ok(byte_count)) => {
            info!(file = %task.output.display(), bytes = byte_count, "Downloaded");
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {:?}", options.item_timeout)),
    };
    if let Some(error) = error {
        warn!(url = %task.url, error = %error, "Download failed");
        let _ = tokio::fs::remove_file(partial_path(&task.output)).await;
        return None;
    }

    if let Some(dest) = &task.extract_to {
        if let Err(e) =
            extract_and_cleanup(task.output.clone(), dest.clone(), options.delete_archive).await
        {
            warn!(archive = %task.output.display(), error = %e, "Error extracting archive");
        }
    }
    Some(task.output.clone())
}

/// Streams `task.url` into `<output>.partial` and renames it into place once complete.
pub async fn try_download(fetcher: &impl Fetch, task: &DownloadTask) -> Result<u64> {
    if let Some(parent_dir) = task.output.parent() {
        tokio::fs::create_dir_all(parent_dir).await?;
    }

    let mut body = fetcher.open(&task.url).await?;

    let partial = partial_path(&task.output);
    let mut partial_file = tokio::fs::File::create(&partial).await?;
    let mut byte_count = 0_u64;
    while let Some(bytes) = body.try_next().await? {
        partial_file.write_all(&bytes).await?;
        byte_count += bytes.len() as u64;
    }
    partial_file.flush().await?;
    drop(partial_file);

    tokio::fs::rename(&partial, &task.output).await?;
    Ok(byte_count)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Local file name for one download.
///
/// Band files use the server-supplied name, then `<entityId>.TIF`. Bundles are
/// named `<displayId>.tar.gz`, falling back to the last segment of the URL path.
pub fn file_name_for(
    item: &DownloadItem,
    selection: &ProductSelection,
    display_ids: &HashMap<String, String>,
) -> Option<String> {
    let name = match selection {
        ProductSelection::Bands(_) => item
            .file_name
            .clone()
            .or_else(|| item.entity_id.as_ref().map(|id| format!("{id}.TIF")))?,
        ProductSelection::Bundle => match item
            .entity_id
            .as_ref()
            .and_then(|id| display_ids.get(id))
        {
            Some(display_id) => format!("{display_id}{BUNDLE_SUFFIX}"),
            None => url_basename(&item.url)?,
        },
    };
    // Never let a remote name escape the output directory.
    Path::new(&name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

fn url_basename(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let segment = url.path_segments()?.last()?;
    (!segment.is_empty()).then(|| segment.to_string())
}

fn extract_dir_name(
    item: &DownloadItem,
    file_name: &str,
    display_ids: &HashMap<String, String>,
) -> String {
    item.entity_id
        .as_ref()
        .and_then(|id| display_ids.get(id))
        .cloned()
        .unwrap_or_else(|| file_name.trim_end_matches(BUNDLE_SUFFIX).to_string())
}
