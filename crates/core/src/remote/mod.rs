//! Client side of the remote content repository.

mod config;
mod entity;
mod mediawiki;
mod retry;
mod traits;
mod types;

pub use config::RemoteConfig;
pub use entity::resolve_entity;
pub use mediawiki::MediaWikiClient;
pub(crate) use mediawiki::file_page_url;
pub use retry::{with_retries, RetryPolicy};
pub use traits::PublishClient;
pub use types::*;
