//! Fetching staged downloads as byte streams.
use anyhow::Result;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::time::Duration;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

pub trait Fetch {
    /// Opens `url`; any non-2xx status is an error.
    async fn open(&self, url: &str) -> Result<ByteStream>;
}

/// Plain HTTPS GET of the signed URLs handed out by the fulfillment service.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    async fn open(&self, url: &str) -> Result<ByteStream> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes_stream().map_err(anyhow::Error::from).boxed())
    }
}
