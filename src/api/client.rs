use super::types::{
    ApiKey, DownloadOption, DownloadOptionsRequest, DownloadOptionsResponse, DownloadRequestBody,
    DownloadRequestResponse, DownloadRetrieveRequest, DownloadRetrieveResponse, LoginRequest,
    SceneSearchRequest, SceneSearchResponse,
};
use super::{Endpoint, M2mApi};
use crate::config::{ClientConfig, Credentials};
use crate::error::M2mError;
use anyhow::Result;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

const AUTH_HEADER: &str = "X-Auth-Token";

/// Every M2M response is wrapped in this envelope, whatever the HTTP status.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// reqwest-backed [`M2mApi`].
pub struct M2mClient {
    client: reqwest::Client,
    base_url: Url,
}

impl M2mClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// POSTs `payload` to `endpoint` and returns the envelope's `data`, which may be absent.
    async fn call_raw<P: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        payload: &P,
        api_key: Option<&ApiKey>,
    ) -> Result<Option<Value>, M2mError> {
        let url = self.base_url.join(endpoint.path())?;
        debug!(endpoint = endpoint.path(), "M2M request");

        let mut request = self.client.post(url).json(payload);
        if let Some(key) = api_key {
            request = request.header(AUTH_HEADER, &key.0);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        unwrap_envelope(status, &body)
    }

    async fn call<P: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        payload: &P,
        api_key: Option<&ApiKey>,
    ) -> Result<T, M2mError> {
        let data = self
            .call_raw(endpoint, payload, api_key)
            .await?
            .ok_or(M2mError::NoData)?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Error codes win over the HTTP status; a non-2xx without one is a transport failure.
fn unwrap_envelope(status: StatusCode, body: &[u8]) -> Result<Option<Value>, M2mError> {
    let envelope = serde_json::from_slice::<Envelope>(body);

    if let Ok(Envelope {
        error_code: Some(code),
        error_message,
        ..
    }) = &envelope
    {
        if !code.is_empty() {
            return Err(M2mError::RemoteService {
                code: code.clone(),
                message: error_message.clone().unwrap_or_default(),
            });
        }
    }
    if !status.is_success() {
        return Err(M2mError::Status(status));
    }

    let envelope = envelope?;
    Ok(envelope.data.filter(|data| !data.is_null()))
}

impl M2mApi for M2mClient {
    async fn login(&self, credentials: &Credentials) -> Result<ApiKey, M2mError> {
        let payload = LoginRequest {
            username: &credentials.username,
            token: &credentials.token,
        };
        let key: String = self.call(Endpoint::Login, &payload, None).await?;
        Ok(ApiKey(key))
    }

    async fn scene_search(
        &self,
        api_key: &ApiKey,
        request: &SceneSearchRequest,
    ) -> Result<SceneSearchResponse, M2mError> {
        self.call(Endpoint::SceneSearch, request, Some(api_key)).await
    }

    async fn download_options(
        &self,
        api_key: &ApiKey,
        request: &DownloadOptionsRequest,
    ) -> Result<Vec<DownloadOption>, M2mError> {
        let response: DownloadOptionsResponse = self
            .call(Endpoint::DownloadOptions, request, Some(api_key))
            .await?;
        Ok(response.into_options())
    }

    async fn download_request(
        &self,
        api_key: &ApiKey,
        request: &DownloadRequestBody,
    ) -> Result<DownloadRequestResponse, M2mError> {
        self.call(Endpoint::DownloadRequest, request, Some(api_key))
            .await
    }

    async fn download_retrieve(
        &self,
        api_key: &ApiKey,
        label: &str,
    ) -> Result<DownloadRetrieveResponse, M2mError> {
        let payload = DownloadRetrieveRequest {
            label: label.to_string(),
        };
        match self
            .call_raw(Endpoint::DownloadRetrieve, &payload, Some(api_key))
            .await?
        {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => Ok(DownloadRetrieveResponse::default()),
        }
    }

    async fn logout(&self, api_key: &ApiKey) -> Result<(), M2mError> {
        self.call_raw(Endpoint::Logout, &serde_json::json!({}), Some(api_key))
            .await?;
        Ok(())
    }
}
