//! Request and response bodies for the M2M JSON operations.
//!
//! Responses are decoded leniently: every field the pipeline does not strictly
//! need is optional or defaulted, and identifiers may arrive as strings or numbers.
use serde::{Deserialize, Deserializer, Serialize};

/// Session token returned by `login-token`, sent as `X-Auth-Token`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(pub String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Serialize, Debug)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub token: &'a str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneSearchRequest {
    pub dataset_name: String,
    pub scene_filter: SceneFilter,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneFilter {
    pub spatial_filter: SpatialFilter,
    pub acquisition_filter: AcquisitionFilter,
    pub cloud_cover_filter: CloudCoverFilter,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpatialFilter {
    pub filter_type: &'static str,
    pub geo_json: GeoJsonPolygon,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GeoJsonPolygon {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl GeoJsonPolygon {
    pub fn from_ring(ring: Vec<[f64; 2]>) -> Self {
        Self {
            kind: "Polygon",
            coordinates: vec![ring],
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AcquisitionFilter {
    pub start: String,
    pub end: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CloudCoverFilter {
    pub min: u8,
    pub max: u8,
}

#[derive(Deserialize, Debug, Default)]
pub struct SceneSearchResponse {
    #[serde(default, deserialize_with = "null_default")]
    pub results: Vec<SceneRecord>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub display_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOptionsRequest {
    pub dataset_name: String,
    pub entity_ids: Vec<String>,
}

/// `download-options` returns either a bare list or an object wrapping one.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum DownloadOptionsResponse {
    List(Vec<DownloadOption>),
    Wrapped {
        #[serde(default, deserialize_with = "null_default")]
        options: Vec<DownloadOption>,
    },
}

impl DownloadOptionsResponse {
    pub fn into_options(self) -> Vec<DownloadOption> {
        match self {
            Self::List(options) => options,
            Self::Wrapped { options } => options,
        }
    }
}

/// A product offered for one entity. Secondary downloads carry the per-band files.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOption {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub available: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub secondary_downloads: Vec<DownloadOption>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestItem {
    pub entity_id: String,
    pub product_id: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct DownloadRequestBody {
    pub downloads: Vec<DownloadRequestItem>,
    pub label: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestResponse {
    #[serde(default, deserialize_with = "null_default")]
    pub available_downloads: Vec<RemoteDownload>,
    #[serde(default, deserialize_with = "null_default")]
    pub preparing_downloads: Vec<RemoteDownload>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DownloadRetrieveRequest {
    pub label: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct DownloadRetrieveResponse {
    #[serde(default, deserialize_with = "null_default")]
    pub available: Vec<RemoteDownload>,
}

/// A staged (or staging) download as the service reports it.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDownload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub download_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Accepts a string, an integer, or null; empty strings become `None`.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Treats an explicit null like a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
