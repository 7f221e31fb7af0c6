use thiserror::Error;

/// Failure of a single exchange with the M2M service.
#[derive(Error, Debug)]
pub enum M2mError {
    #[error("{code}: {message}")]
    RemoteService { code: String, message: String },

    #[error("response carried no data")]
    NoData,

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unable to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

/// Input problems caught before any network call. The `Display` text is the
/// message handed back to the caller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Error: output_directory, start_date, end_date, and bounding_box are required.")]
    MissingRequired,

    #[error("Error: Invalid bounding_box format. Use 'min_lon,min_lat,max_lon,max_lat'.")]
    BoundingBoxFormat,

    #[error("Error: bounding_box coordinates out of range. Longitude must be within [-180, 180] and latitude within [-90, 90].")]
    BoundingBoxRange,

    #[error("Error: Invalid date format. Use 'YYYY-MM-DD'.")]
    DateFormat,

    #[error("Error: max_cloud_cover must be between 0 and 100.")]
    CloudCover,

    #[error("Error: max_concurrent_downloads must be at least 1.")]
    Concurrency,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Error: Invalid sensor '{0}'.")]
    InvalidSensor(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    MissingEnv(&'static str),
}

/// Reasons a pipeline run stops before reaching retrieval.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Error: unable to create output directory {path}: {source}")]
    OutputDirectory {
        path: String,
        source: std::io::Error,
    },

    #[error("Login failed: {0}")]
    Login(M2mError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("Download request failed: {0}")]
    DownloadRequest(M2mError),
}
