//! Source providers that supply candidate media items and their bytes.

mod config;
mod flickr;
mod http;
mod mapillary;
mod registry;
mod traits;
mod types;

pub use config::{FlickrConfig, MapillaryConfig};
pub use flickr::FlickrHandler;
pub use mapillary::MapillaryHandler;
pub use registry::SourceRegistry;
pub use traits::SourceHandler;
pub use types::*;
