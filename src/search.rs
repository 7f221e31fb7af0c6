//! Catalog search: one `scene-search` per requested sensor, merged into a flat scene list.
use crate::api::types::{
    AcquisitionFilter, ApiKey, CloudCoverFilter, GeoJsonPolygon, SceneFilter, SceneSearchRequest,
    SpatialFilter,
};
use crate::api::M2mApi;
use crate::error::SearchError;
use crate::request::{SearchCriteria, Sensor};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// One catalog hit. `entity_id` is the remote key, `display_id` names output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub entity_id: String,
    pub dataset: String,
    pub display_id: String,
}

pub fn scene_search_request(criteria: &SearchCriteria, dataset: &str) -> SceneSearchRequest {
    SceneSearchRequest {
        dataset_name: dataset.to_string(),
        scene_filter: SceneFilter {
            spatial_filter: SpatialFilter {
                filter_type: "geojson",
                geo_json: GeoJsonPolygon::from_ring(criteria.bounding_box.ring()),
            },
            acquisition_filter: AcquisitionFilter {
                start: criteria.start.format("%Y-%m-%d").to_string(),
                end: criteria.end.format("%Y-%m-%d").to_string(),
            },
            cloud_cover_filter: CloudCoverFilter {
                min: 0,
                max: criteria.cloud_cover_ceiling(),
            },
        },
    }
}

/// Searches every sensor in turn.
///
/// Any unrecognised sensor code rejects the whole search before a query is
/// issued. A failing query for a valid sensor only loses that sensor's scenes.
/// Scenes are deduplicated by entity id, keeping the first occurrence.
pub async fn search(
    api: &impl M2mApi,
    api_key: &ApiKey,
    criteria: &SearchCriteria,
    sensors: &[String],
) -> Result<Vec<Scene>, SearchError> {
    let sensors = sensors
        .iter()
        .map(|code| {
            code.parse::<Sensor>()
                .map_err(|_| SearchError::InvalidSensor(code.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut scenes: Vec<Scene> = vec![];
    let mut seen: HashSet<String> = HashSet::new();

    for sensor in sensors {
        let dataset = sensor.dataset();
        let request = scene_search_request(criteria, dataset);
        let response = match api.scene_search(api_key, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(sensor = sensor.code(), dataset, error = %e, "Scene search failed");
                continue;
            }
        };
        info!(
            sensor = sensor.code(),
            dataset,
            count = response.results.len(),
            "Scene search complete"
        );

        for record in response.results {
            let (Some(entity_id), Some(display_id)) = (record.entity_id, record.display_id) else {
                continue;
            };
            if display_id.is_empty() || !seen.insert(entity_id.clone()) {
                continue;
            }
            scenes.push(Scene {
                entity_id,
                dataset: dataset.to_string(),
                display_id,
            });
        }
    }

    Ok(scenes)
}

/// entity id -> display id, used to name bundle archives and their directories.
pub fn display_ids(scenes: &[Scene]) -> HashMap<String, String> {
    scenes
        .iter()
        .map(|scene| (scene.entity_id.clone(), scene.display_id.clone()))
        .collect()
}
