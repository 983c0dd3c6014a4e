pub mod aggregate;
pub mod config;
pub mod data_models;
pub mod errors;
pub mod features;
pub mod identity;
pub mod interval;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod power;
pub mod raw_reader;
pub mod reducer;
pub mod store;
pub mod validity;

pub use config::{PairedChannelOffsets, PipelineConfig};
pub use errors::{InputError, PipelineError, Result};
pub use interval::Interval;
pub use pipeline::{Pipeline, RangeReport, Stage};

#[cfg(test)]
mod tests;
