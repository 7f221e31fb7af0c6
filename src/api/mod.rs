//! The M2M catalog and fulfillment service.
mod client;
pub mod types;

pub use client::M2mClient;

use crate::config::Credentials;
use crate::error::M2mError;
use types::{
    ApiKey, DownloadOption, DownloadOptionsRequest, DownloadRequestBody, DownloadRequestResponse,
    DownloadRetrieveResponse, SceneSearchRequest, SceneSearchResponse,
};

/// Remote operations consumed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    SceneSearch,
    DownloadOptions,
    DownloadRequest,
    DownloadRetrieve,
    Logout,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Login => "login-token",
            Self::SceneSearch => "scene-search",
            Self::DownloadOptions => "download-options",
            Self::DownloadRequest => "download-request",
            Self::DownloadRetrieve => "download-retrieve",
            Self::Logout => "logout",
        }
    }
}

/// One method per remote operation. Everything after `login` is authenticated
/// with the returned [`ApiKey`].
pub trait M2mApi {
    async fn login(&self, credentials: &Credentials) -> Result<ApiKey, M2mError>;

    async fn scene_search(
        &self,
        api_key: &ApiKey,
        request: &SceneSearchRequest,
    ) -> Result<SceneSearchResponse, M2mError>;

    async fn download_options(
        &self,
        api_key: &ApiKey,
        request: &DownloadOptionsRequest,
    ) -> Result<Vec<DownloadOption>, M2mError>;

    async fn download_request(
        &self,
        api_key: &ApiKey,
        request: &DownloadRequestBody,
    ) -> Result<DownloadRequestResponse, M2mError>;

    async fn download_retrieve(
        &self,
        api_key: &ApiKey,
        label: &str,
    ) -> Result<DownloadRetrieveResponse, M2mError>;

    async fn logout(&self, api_key: &ApiKey) -> Result<(), M2mError>;
}
