use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Provider that items are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Mapillary,
    Flickr,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Mapillary => "mapillary",
            SourceKind::Flickr => "flickr",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mapillary" => Ok(SourceKind::Mapillary),
            "flickr" => Ok(SourceKind::Flickr),
            other => Err(SourceError::UnknownSource(other.to_string())),
        }
    }
}

/// Errors from source providers.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown source provider: {0}")]
    UnknownSource(String),

    #[error("source provider not configured: {0}")]
    NotConfigured(SourceKind),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("invalid collection: {0}")]
    InvalidCollection(String),

    #[error("source request failed: {0}")]
    Http(String),

    #[error("source request timed out: {0}")]
    Timeout(String),

    #[error("source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid source response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Whether a collection listing failed because the collection is too
    /// large to list in one call. Callers then page through its ids.
    pub fn is_listing_overload(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_) | SourceError::Status { status: 500, .. }
        )
    }
}

/// Streamed original bytes of a media item.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Who produced an item on the source provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    pub username: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compass_angle: Option<f64>,
}

/// Metadata of one candidate media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub source: SourceKind,
    /// Suggested target title on the remote repository.
    pub title: String,
    /// Collection (e.g. sequence) the item belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("mapillary".parse::<SourceKind>().unwrap(), SourceKind::Mapillary);
        assert_eq!("flickr".parse::<SourceKind>().unwrap(), SourceKind::Flickr);
        assert!(matches!(
            "panoramax".parse::<SourceKind>(),
            Err(SourceError::UnknownSource(_))
        ));
        assert_eq!(
            serde_json::to_string(&SourceKind::Mapillary).unwrap(),
            "\"mapillary\""
        );
        }

    #[test]
    fn test_listing_overload() {
        assert!(SourceError::Timeout("slow".to_string()).is_listing_overload());
        assert!(SourceError::Status {
            status: 500,
            body: String::new()
        }
        .is_listing_overload());
        assert!(!SourceError::Status {
            status: 403,
            body: String::new()
        }
        .is_listing_overload());
        assert!(!SourceError::NotFound("seq".to_string()).is_listing_overload());
    }
}
