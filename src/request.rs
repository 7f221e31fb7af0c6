use crate::config::RetrievalOptions;
use crate::error::ValidationError;
use anyhow::Result;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

fn default_cloud_cover() -> f64 {
    20.0
}

fn default_sensors() -> Vec<String> {
    vec!["L8".to_string(), "L9".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    5
}

/// Everything a caller supplies for one acquisition run. Fields are kept as
/// loosely typed as the caller hands them over; [`AcquisitionRequest::validate`]
/// turns them into a [`ValidatedRequest`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AcquisitionRequest {
    #[serde(default)]
    pub output_directory: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default = "default_cloud_cover")]
    pub max_cloud_cover: f64,
    #[serde(default = "default_sensors")]
    pub landsat_sensors: Vec<String>,
    #[serde(default)]
    pub bands: Option<Vec<String>>,
    #[serde(default)]
    pub bounding_box: String,
    #[serde(default = "default_true")]
    pub delete_archive: bool,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_downloads: usize,
    #[serde(default)]
    pub write_plan: bool,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        Self {
            output_directory: String::new(),
            start_date: String::new(),
            end_date: String::new(),
            max_cloud_cover: default_cloud_cover(),
            landsat_sensors: default_sensors(),
            bands: None,
            bounding_box: String::new(),
            delete_archive: true,
            max_concurrent_downloads: default_concurrency(),
            write_plan: false,
        }
    }
}

impl AcquisitionRequest {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let request: Self = toml::from_str(&content)?;
        Ok(request)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Checks run in a fixed order so the first problem found is the one reported.
    pub fn validate(&self) -> Result<ValidatedRequest, ValidationError> {
        let required = [
            &self.output_directory,
            &self.start_date,
            &self.end_date,
            &self.bounding_box,
        ];
        if required.iter().any(|field| field.trim().is_empty()) {
            return Err(ValidationError::MissingRequired);
        }

        let bounding_box: BoundingBox = self.bounding_box.parse()?;
        let start = parse_date(&self.start_date)?;
        let end = parse_date(&self.end_date)?;

        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err(ValidationError::CloudCover);
        }
        if self.max_concurrent_downloads == 0 {
            return Err(ValidationError::Concurrency);
        }

        Ok(ValidatedRequest {
            output_dir: PathBuf::from(&self.output_directory),
            criteria: SearchCriteria {
                bounding_box,
                start,
                end,
                max_cloud_cover: self.max_cloud_cover,
            },
            sensors: self.landsat_sensors.clone(),
            bands: self.bands.clone(),
            retrieval: RetrievalOptions {
                max_concurrency: self.max_concurrent_downloads,
                delete_archive: self.delete_archive,
                ..RetrievalOptions::default()
            },
            write_plan: self.write_plan,
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let re = Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Regex pattern should always compile");
    if !re.is_match(value.trim()) {
        return Err(ValidationError::DateFormat);
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ValidationError::DateFormat)
}

#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub output_dir: PathBuf,
    pub criteria: SearchCriteria,
    /// Raw sensor codes; resolved against the dataset table by the search planner.
    pub sensors: Vec<String>,
    pub bands: Option<Vec<String>>,
    pub retrieval: RetrievalOptions,
    pub write_plan: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub bounding_box: BoundingBox,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub max_cloud_cover: f64,
}

impl SearchCriteria {
    /// Cloud cover ceiling as sent to the catalog (fraction truncated).
    pub fn cloud_cover_ceiling(&self) -> u8 {
        self.max_cloud_cover.trunc() as u8
    }
}

/// WGS84 box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Closed polygon ring, counter-clockwise from the south-west corner.
    pub fn ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.min_lon, self.min_lat],
            [self.max_lon, self.min_lat],
            [self.max_lon, self.max_lat],
            [self.min_lon, self.max_lat],
            [self.min_lon, self.min_lat],
        ]
    }

    fn in_range(&self) -> bool {
        let lon = -180.0..=180.0;
        let lat = -90.0..=90.0;
        lon.contains(&self.min_lon)
            && lon.contains(&self.max_lon)
            && lat.contains(&self.min_lat)
            && lat.contains(&self.max_lat)
    }
}

impl FromStr for BoundingBox {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ValidationError::BoundingBoxFormat)?;

        let [min_lon, min_lat, max_lon, max_lat] =
            <[f64; 4]>::try_from(values).map_err(|_| ValidationError::BoundingBoxFormat)?;

        let bounding_box = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        if !bounding_box.in_range() {
            return Err(ValidationError::BoundingBoxRange);
        }
        Ok(bounding_box)
    }
}

/// Landsat missions and the Collection 2 Level-2 dataset backing each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    L8,
    L9,
    L7,
    L5,
}

impl Sensor {
    pub fn dataset(&self) -> &'static str {
        match self {
            Self::L8 | Self::L9 => "landsat_ot_c2_l2",
            Self::L7 => "landsat_etm_c2_l2",
            Self::L5 => "landsat_tm_c2_l2",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::L8 => "L8",
            Self::L9 => "L9",
            Self::L7 => "L7",
            Self::L5 => "L5",
        }
    }
}

impl FromStr for Sensor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L8" => Ok(Self::L8),
            "L9" => Ok(Self::L9),
            "L7" => Ok(Self::L7),
            "L5" => Ok(Self::L5),
            _ => Err(s.to_string()),
        }
    }
}
