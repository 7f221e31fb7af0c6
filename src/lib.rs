#![allow(async_fn_in_trait)]
//! Batch acquisition of Landsat Collection 2 Level-2 scenes through the USGS
//! M2M catalog and fulfillment API.
pub mod api;
pub mod config;
pub mod download_plan;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod poll;
pub mod request;
pub mod resolve;
pub mod search;

pub use config::{ClientConfig, Credentials, PollPolicy, RetrievalOptions};
pub use pipeline::{download_landsat, Pipeline, PipelineOutcome};
pub use request::AcquisitionRequest;
