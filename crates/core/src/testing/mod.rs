//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external collaborator
//! traits, allowing the dispatcher, pipeline and gateway to be exercised
//! end to end without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use curator_core::testing::{fixtures, MockPublishClient, MockSourceHandler};
//!
//! let publisher = MockPublishClient::new();
//! let source = MockSourceHandler::new();
//!
//! source.add_item(fixtures::media_item("1001"), fixtures::content(4096)).await;
//! publisher.set_duplicates("Photo 1001.jpg", &["Existing.jpg"]).await;
//! ```

mod failing_slot_store;
mod mock_publish_client;
mod mock_source_handler;

pub use failing_slot_store::FailingSlotStore;
pub use mock_publish_client::{MockPublishClient, RecordedChunk};
pub use mock_source_handler::{ListingFailure, MockSourceHandler};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{TimeZone, Utc};

    use crate::metadata::{DataValue, EntityIdValue, Label, Snak, Statement};
    use crate::source::{Creator, GeoPoint, MediaItem, SourceKind};
    use crate::store::NewUploadRequest;

    /// A media item with reasonable defaults.
    pub fn media_item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            source: SourceKind::Mapillary,
            title: format!("Photo {}.jpg", id),
            collection: Some("seq-1".to_string()),
            original_url: format!("https://images.example.org/{}.jpg", id),
            page_url: Some(format!("https://www.mapillary.com/app/?pKey={}", id)),
            thumbnail_url: None,
            taken_at: Utc.with_ymd_and_hms(2021, 1, 1, 12, 0, 0).single(),
            creator: Some(Creator {
                id: "100".to_string(),
                username: Some("walker".to_string()),
                profile_url: None,
            }),
            location: Some(GeoPoint {
                latitude: 45.0,
                longitude: 7.0,
                compass_angle: Some(90.0),
            }),
            width: Some(4000),
            height: Some(3000),
            camera_make: None,
            camera_model: None,
        }
    }

    /// Deterministic file content of `len` bytes.
    pub fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// `depicts` statement for an item id.
    pub fn depicts(item: u64) -> Statement {
        Statement::new(Snak::value(
            "P180",
            "wikibase-item",
            DataValue::EntityId(EntityIdValue::item(item)),
        ))
    }

    /// Upload request for a media item created by [`media_item`].
    pub fn upload_item(key: &str) -> NewUploadRequest {
        let mut item = NewUploadRequest::new(SourceKind::Mapillary, key, format!("Photo {}.jpg", key));
        item.collection = Some("seq-1".to_string());
        item.wikitext = Some("== {{int:filedesc}} ==".to_string());
        item.statements = vec![depicts(146)];
        item.labels = vec![Label {
            language: "en".to_string(),
            value: format!("Photo {}", key),
        }];
        item
    }
}
