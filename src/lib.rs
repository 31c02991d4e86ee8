//! Polder flood-control service.
//!
//! Reads sensor and rainfall series from the shared time-series store,
//! classifies them into a pump/alert decision, and writes the decision back
//! under a timestamp key. A second recurring job keeps the rainfall series
//! fed from the BMKG public forecast.

pub mod audit;
pub mod channels;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod features;
pub mod forecast;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod on_demand;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod timestamps;
pub mod verify;
