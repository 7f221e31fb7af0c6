//! Maps scenes to downloadable products, either whole bundles or individual band files.
use crate::api::types::{ApiKey, DownloadOption, DownloadOptionsRequest, DownloadRequestItem};
use crate::api::M2mApi;
use crate::search::Scene;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What the caller wants per scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductSelection {
    Bundle,
    /// Band codes such as `B2`, matched against secondary file names.
    Bands(Vec<String>),
}

impl ProductSelection {
    pub fn from_bands(bands: Option<&[String]>) -> Self {
        match bands {
            Some(bands) => Self::Bands(bands.to_vec()),
            None => Self::Bundle,
        }
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self, Self::Bundle)
    }
}

/// Scenes grouped by dataset, in order of first appearance.
pub fn group_by_dataset(scenes: &[Scene]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = vec![];
    for scene in scenes {
        match groups.iter_mut().find(|(dataset, _)| *dataset == scene.dataset) {
            Some((_, entity_ids)) => entity_ids.push(scene.entity_id.clone()),
            None => groups.push((scene.dataset.clone(), vec![scene.entity_id.clone()])),
        }
    }
    groups
}

/// One available option per entity, in response order. Bundles keep the first
/// one offered; band selection keeps the last, which carries the secondaries.
fn available_by_entity<'a>(
    options: &'a [DownloadOption],
    selection: &ProductSelection,
) -> HashMap<&'a str, &'a DownloadOption> {
    let mut by_entity: HashMap<&str, &DownloadOption> = HashMap::new();
    for option in options.iter().filter(|o| o.available) {
        let Some(entity_id) = option.entity_id.as_deref() else {
            continue;
        };
        match selection {
            ProductSelection::Bundle => {
                by_entity.entry(entity_id).or_insert(option);
            }
            ProductSelection::Bands(_) => {
                by_entity.insert(entity_id, option);
            }
        }
    }
    by_entity
}

/// True when `file_name` ends with `_<BAND>.TIF` for one of the requested bands.
pub fn matches_band(file_name: &str, bands: &[String]) -> bool {
    bands
        .iter()
        .any(|band| file_name.ends_with(&format!("_{}.TIF", band.trim().to_uppercase())))
}

fn band_items(option: &DownloadOption, bands: &[String]) -> Vec<DownloadRequestItem> {
    option
        .secondary_downloads
        .iter()
        .filter(|secondary| secondary.available)
        .filter(|secondary| {
            secondary
                .display_id
                .as_deref()
                .is_some_and(|name| matches_band(name, bands))
        })
        .filter_map(|secondary| {
            Some(DownloadRequestItem {
                entity_id: secondary.entity_id.clone()?,
                product_id: secondary.id.clone()?,
            })
        })
        .collect()
}

/// Builds the fulfillment request items for `scenes`.
///
/// One `download-options` query is issued per dataset. A dataset whose query
/// fails contributes nothing and the remaining datasets are still resolved.
pub async fn resolve(
    api: &impl M2mApi,
    api_key: &ApiKey,
    scenes: &[Scene],
    selection: &ProductSelection,
) -> Vec<DownloadRequestItem> {
    let mut items: Vec<DownloadRequestItem> = vec![];

    for (dataset, entity_ids) in group_by_dataset(scenes) {
        let request = DownloadOptionsRequest {
            dataset_name: dataset.clone(),
            entity_ids,
        };
        let options = match api.download_options(api_key, &request).await {
            Ok(options) => options,
            Err(e) => {
                warn!(dataset = %dataset, error = %e, "Download-options request failed");
                continue;
            }
        };
        let by_entity = available_by_entity(&options, selection);

        let before = items.len();
        for entity_id in &request.entity_ids {
            let Some(option) = by_entity.get(entity_id.as_str()) else {
                debug!(entity_id = %entity_id, "No available option");
                continue;
            };
            match selection {
                ProductSelection::Bundle => {
                    if let Some(product_id) = option.id.clone() {
                        items.push(DownloadRequestItem {
                            entity_id: entity_id.clone(),
                            product_id,
                        });
                    }
                }
                ProductSelection::Bands(bands) => items.extend(band_items(option, bands)),
            }
        }
        info!(dataset = %dataset, count = items.len() - before, "Resolved download options");
    }

    items
}
