use anyhow::Result;
use clap::Parser;
use landsat_m2m::pipeline::summarize;
use landsat_m2m::{AcquisitionRequest, ClientConfig, Credentials, Pipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const API_URL_ENV: &str = "M2M_API_URL";

/// Download Landsat Collection 2 Level-2 scenes through the USGS M2M API.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file describing the acquisition; other flags override its fields
    #[arg(long)]
    request: Option<PathBuf>,

    /// Directory receiving downloads and extracted bundles
    #[arg(short, long)]
    output: Option<String>,

    /// First acquisition date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last acquisition date (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,

    /// min_lon,min_lat,max_lon,max_lat in WGS84 degrees
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<String>,

    /// Maximum cloud cover percentage
    #[arg(long)]
    cloud: Option<f64>,

    /// Sensor code (L8, L9, L7, L5); repeatable
    #[arg(long = "sensor")]
    sensors: Vec<String>,

    /// Band code such as B4; repeatable. Without it whole bundles are downloaded
    #[arg(long = "band")]
    bands: Vec<String>,

    /// Keep bundle archives after extracting them
    #[arg(long)]
    keep_archives: bool,

    /// Maximum number of simultaneous downloads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Save the resolved download plan as download_plan.json in the output directory
    #[arg(long)]
    write_plan: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_request(self) -> Result<AcquisitionRequest> {
        let mut request = match &self.request {
            Some(path) => AcquisitionRequest::read(path)?,
            None => AcquisitionRequest::default(),
        };
        if let Some(output) = self.output {
            request.output_directory = output;
        }
        if let Some(start) = self.start {
            request.start_date = start;
        }
        if let Some(end) = self.end {
            request.end_date = end;
        }
        if let Some(bbox) = self.bbox {
            request.bounding_box = bbox;
        }
        if let Some(cloud) = self.cloud {
            request.max_cloud_cover = cloud;
        }
        if !self.sensors.is_empty() {
            request.landsat_sensors = self.sensors;
        }
        if !self.bands.is_empty() {
            request.bands = Some(self.bands);
        }
        if self.keep_archives {
            request.delete_archive = false;
        }
        if let Some(concurrency) = self.concurrency {
            request.max_concurrent_downloads = concurrency;
        }
        if self.write_plan {
            request.write_plan = true;
        }
        Ok(request)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "landsat_m2m=debug,info"
    } else {
        "landsat_m2m=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let credentials = Credentials::from_env()?;
    let mut config = ClientConfig::default();
    if let Ok(url) = std::env::var(API_URL_ENV) {
        config.base_url = url;
    }

    let request = args.into_request()?;
    let pipeline = Pipeline::connect(credentials, &config)?;

    let result = pipeline.run(&request).await;
    println!("{}", summarize(&result));

    // Empty searches are outcomes, not failures.
    if result.is_ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
