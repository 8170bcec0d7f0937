//! Mapillary source provider (Graph API v4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::config::MapillaryConfig;
use super::http::{build_client, query_existing, read_json, request_failed, stream_original};
use super::traits::SourceHandler;
use super::types::{ByteStream, Creator, GeoPoint, MediaItem, SourceError, SourceKind};

const IMAGE_FIELDS: &str = "id,captured_at,compass_angle,creator,geometry,height,width,make,model,sequence,thumb_256_url,thumb_original_url";

/// Remote repository property holding the Mapillary photo id.
const MAPILLARY_ID_PROPERTY: &str = "P1947";

pub struct MapillaryHandler {
    client: Client,
    config: MapillaryConfig,
}

impl MapillaryHandler {
    pub fn new(config: MapillaryConfig) -> Result<Self, SourceError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        not_found: &str,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .query(&[("access_token", self.config.access_token.as_str())])
            .query(query)
            .send()
            .await
            .map_err(request_failed)?;

        read_json(response, not_found).await
    }
}

#[async_trait]
impl SourceHandler for MapillaryHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Mapillary
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<MediaItem>, SourceError> {
        debug!(sequence = collection, "Fetching Mapillary sequence");
        let page: DataPage<RawImage> = self
            .get_json(
                &self.api_url("images"),
                &[("sequence_ids", collection), ("fields", IMAGE_FIELDS)],
                collection,
            )
            .await?;

        let mut images = page.data;
        images.sort_by_key(|i| i.captured_at);
        images.into_iter().map(to_media_item).collect()
    }

    async fn fetch_image_metadata(&self, id: &str) -> Result<MediaItem, SourceError> {
        let raw: RawImage = self
            .get_json(&self.api_url(id), &[("fields", IMAGE_FIELDS)], id)
            .await?;
        to_media_item(raw)
    }

    async fn fetch_existing(&self, ids: &[String]) -> Result<HashSet<String>, SourceError> {
        query_existing(
            &self.client,
            &self.config.query_service_url,
            MAPILLARY_ID_PROPERTY,
            ids,
        )
        .await
    }

    async fn fetch_collection_ids(&self, collection: &str) -> Result<Vec<String>, SourceError> {
        let page: DataPage<RawId> = self
            .get_json(&self.api_url("image_ids"), &[("sequence_id", collection)], collection)
            .await?;
        Ok(page.data.into_iter().map(|i| i.id.into_string()).collect())
    }

    async fn fetch_batch(
        &self,
        _collection: &str,
        ids: &[String],
    ) -> Result<Vec<MediaItem>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let page: DataPage<RawImage> = self
            .get_json(
                &self.api_url("images"),
                &[("image_ids", joined.as_str()), ("fields", IMAGE_FIELDS)],
                &joined,
            )
            .await?;

        let items: Vec<MediaItem> = page
            .data
            .into_iter()
            .filter_map(|raw| match to_media_item(raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping malformed Mapillary image: {}", e);
                    None
                }
            })
            .collect();
        Ok(items)
    }

    async fn open_original(&self, item: &MediaItem) -> Result<ByteStream, SourceError> {
        stream_original(&self.client, item).await
    }
}

#[derive(Debug, Deserialize)]
struct DataPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIdValue {
    Text(String),
    Number(u64),
}

impl RawIdValue {
    fn into_string(self) -> String {
        match self {
            RawIdValue::Text(s) => s,
            RawIdValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawId {
    id: RawIdValue,
}

#[derive(Debug, Deserialize)]
struct RawCreator {
    id: RawIdValue,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    id: RawIdValue,
    /// Milliseconds since the epoch.
    captured_at: Option<i64>,
    compass_angle: Option<f64>,
    creator: Option<RawCreator>,
    geometry: Option<RawGeometry>,
    width: Option<u32>,
    height: Option<u32>,
    make: Option<String>,
    model: Option<String>,
    sequence: Option<String>,
    thumb_256_url: Option<String>,
    thumb_original_url: Option<String>,
}

fn to_media_item(raw: RawImage) -> Result<MediaItem, SourceError> {
    let id = raw.id.into_string();
    let original_url = raw
        .thumb_original_url
        .ok_or_else(|| SourceError::InvalidResponse(format!("image {} has no original url", id)))?;
    let taken_at: Option<DateTime<Utc>> = raw
        .captured_at
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let date = taken_at
        .map(|t| t.date_naive().to_string())
        .unwrap_or_else(|| "undated".to_string());

    let location = raw.geometry.and_then(|g| match g.coordinates.as_slice() {
        [longitude, latitude, ..] => Some(GeoPoint {
            latitude: *latitude,
            longitude: *longitude,
            compass_angle: raw.compass_angle,
        }),
        _ => None,
    });

    let creator = raw.creator.map(|c| Creator {
        id: c.id.into_string(),
        profile_url: c
            .username
            .as_ref()
            .map(|u| format!("https://www.mapillary.com/app/user/{}", u)),
        username: c.username,
    });

    Ok(MediaItem {
        title: format!("Photo from Mapillary {} ({}).jpg", date, id),
        page_url: Some(format!(
            "https://www.mapillary.com/app/?pKey={}&focus=photo",
            id
        )),
        id,
        source: SourceKind::Mapillary,
        collection: raw.sequence,
        original_url,
        thumbnail_url: raw.thumb_256_url,
        taken_at,
        creator,
        location,
        width: raw.width,
        height: raw.height,
        camera_make: raw.make,
        camera_model: raw.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_image_json() -> serde_json::Value {
        serde_json::json!({
            "id": "498763468214164",
            "captured_at": 1_609_502_400_000i64,
            "compass_angle": 123.5,
            "creator": {"id": "1001", "username": "walker"},
            "geometry": {"type": "Point", "coordinates": [9.19, 45.46]},
            "width": 4000,
            "height": 3000,
            "make": "GoPro",
            "model": "Max",
            "sequence": "seq-1",
            "thumb_256_url": "https://img/256.jpg",
            "thumb_original_url": "https://img/original.jpg"
        })
    }

    #[test]
    fn test_to_media_item() {
        let raw: RawImage = serde_json::from_value(raw_image_json()).unwrap();
        let item = to_media_item(raw).unwrap();

        assert_eq!(item.id, "498763468214164");
        assert_eq!(item.title, "Photo from Mapillary 2021-01-01 (498763468214164).jpg");
        assert_eq!(item.collection.as_deref(), Some("seq-1"));
        assert_eq!(item.original_url, "https://img/original.jpg");
        let location = item.location.unwrap();
        assert_eq!(location.latitude, 45.46);
        assert_eq!(location.longitude, 9.19);
        let creator = item.creator.unwrap();
        assert_eq!(
            creator.profile_url.as_deref(),
            Some("https://www.mapillary.com/app/user/walker")
        );
    }

    #[test]
    fn test_to_media_item_requires_original_url() {
        let mut json = raw_image_json();
        json.as_object_mut().unwrap().remove("thumb_original_url");
        let raw: RawImage = serde_json::from_value(json).unwrap();
        assert!(matches!(to_media_item(raw), Err(SourceError::InvalidResponse(_))));
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let mut json = raw_image_json();
        json["id"] = serde_json::json!(42);
        let raw: RawImage = serde_json::from_value(json).unwrap();
        assert_eq!(to_media_item(raw).unwrap().id, "42");
    }
}
