//! Session lifecycle around search, resolution, fulfillment and retrieval.
use crate::api::types::ApiKey;
use crate::api::{M2mApi, M2mClient};
use crate::config::{ClientConfig, Credentials, PollPolicy, RetrievalOptions};
use crate::download_plan::DownloadPlan;
use crate::error::PipelineError;
use crate::fetch::{Fetch, HttpFetcher};
use crate::poll::{resolve_availability, run_label};
use crate::request::{AcquisitionRequest, ValidatedRequest};
use crate::resolve::{resolve, ProductSelection};
use crate::search::{display_ids, search};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

pub const PLAN_FILE_NAME: &str = "download_plan.json";

/// How a run ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    NoScenes,
    NoDownloads,
    Completed {
        files: Vec<PathBuf>,
        output_dir: PathBuf,
    },
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoScenes => write!(f, "No scenes found."),
            Self::NoDownloads => write!(f, "No available downloads found."),
            Self::Completed { files, output_dir } => write!(
                f,
                "Successfully downloaded {} files to {}.",
                files.len(),
                output_dir.display()
            ),
        }
    }
}

/// Renders a run's result as the single line reported to the caller.
pub fn summarize(result: &Result<PipelineOutcome, PipelineError>) -> String {
    match result {
        Ok(outcome) => outcome.to_string(),
        Err(e) => e.to_string(),
    }
}

pub struct Pipeline<A, F> {
    api: A,
    fetcher: F,
    credentials: Credentials,
    poll: PollPolicy,
}

impl Pipeline<M2mClient, HttpFetcher> {
    /// Pipeline against the live service.
    pub fn connect(credentials: Credentials, config: &ClientConfig) -> anyhow::Result<Self> {
        let api = M2mClient::new(config)?;
        let fetcher = HttpFetcher::new(RetrievalOptions::default().item_timeout)?;
        Ok(Self::new(api, fetcher, credentials))
    }
}

impl<A: M2mApi, F: Fetch> Pipeline<A, F> {
    pub fn new(api: A, fetcher: F, credentials: Credentials) -> Self {
        Self {
            api,
            fetcher,
            credentials,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Validates `request`, then logs in, runs every stage and logs out.
    ///
    /// Nothing touches the network until validation has passed. Once login has
    /// succeeded, logout is attempted exactly once whatever the stages return,
    /// and its failure never changes the result.
    pub async fn run(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<PipelineOutcome, PipelineError> {
        let validated = request.validate()?;
        tokio::fs::create_dir_all(&validated.output_dir)
            .await
            .map_err(|source| PipelineError::OutputDirectory {
                path: validated.output_dir.display().to_string(),
                source,
            })?;

        let api_key = self
            .api
            .login(&self.credentials)
            .await
            .map_err(PipelineError::Login)?;
        info!("Login successful");

        let result = self.run_session(&api_key, &validated).await;

        match self.api.logout(&api_key).await {
            Ok(()) => info!("Logged out"),
            Err(e) => warn!(error = %e, "Logout failed"),
        }
        result
    }

    /// [`Pipeline::run`] reduced to its summary line.
    pub async fn execute(&self, request: &AcquisitionRequest) -> String {
        let result = self.run(request).await;
        summarize(&result)
    }

    async fn run_session(
        &self,
        api_key: &ApiKey,
        request: &ValidatedRequest,
    ) -> Result<PipelineOutcome, PipelineError> {
        let scenes = search(&self.api, api_key, &request.criteria, &request.sensors).await?;
        if scenes.is_empty() {
            return Ok(PipelineOutcome::NoScenes);
        }
        info!(count = scenes.len(), "Scenes found");

        let selection = ProductSelection::from_bands(request.bands.as_deref());
        let requested = resolve(&self.api, api_key, &scenes, &selection).await;
        if requested.is_empty() {
            return Ok(PipelineOutcome::NoDownloads);
        }

        let label = run_label();
        let available = resolve_availability(&self.api, api_key, requested, &label, &self.poll)
            .await
            .map_err(PipelineError::DownloadRequest)?;

        let plan = DownloadPlan::build(
            &available,
            &request.output_dir,
            &selection,
            &display_ids(&scenes),
        );
        if request.write_plan {
            let path = request.output_dir.join(PLAN_FILE_NAME);
            if let Err(e) = plan.write(&path).await {
                warn!(path = %path.display(), error = %e, "Unable to write download plan");
            }
        }

        let files = plan.execute(&self.fetcher, &request.retrieval).await;
        info!(
            downloaded = files.len(),
            planned = plan.tasks().len(),
            "Retrieval finished"
        );
        Ok(PipelineOutcome::Completed {
            files,
            output_dir: request.output_dir.clone(),
        })
    }
}

/// Runs one acquisition against the live service and returns its summary line.
/// Failures, including client construction, come back as text.
pub async fn download_landsat(request: &AcquisitionRequest, credentials: Credentials) -> String {
    let pipeline = match Pipeline::connect(credentials, &ClientConfig::default()) {
        Ok(pipeline) => pipeline,
        Err(e) => return format!("Error: unable to create HTTP client: {e}"),
    };
    pipeline.execute(request).await
}
