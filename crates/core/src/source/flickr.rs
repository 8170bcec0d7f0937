//! Flickr source provider (REST API). Collections are albums, addressed by
//! their public URL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::try_join_all;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::config::FlickrConfig;
use super::http::{build_client, query_existing, read_json, request_failed, stream_original};
use super::traits::SourceHandler;
use super::types::{ByteStream, Creator, GeoPoint, MediaItem, SourceError, SourceKind};

const PHOTO_EXTRAS: &str = "description,license,date_taken,geo,tags,url_o,url_l,url_q,url_s,original_format,owner_name,path_alias";

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Album addressed by a Flickr URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Album {
    pub id: String,
    pub user_id: String,
}

/// Parse `https://www.flickr.com/photos/{user}/albums/{id}` (or the older
/// `/sets/{id}` form).
pub(crate) fn parse_album_url(input: &str) -> Result<Album, SourceError> {
    let invalid = || SourceError::InvalidCollection(format!("not a Flickr album URL: {}", input));

    let url = Url::parse(input.trim()).map_err(|_| invalid())?;
    let host = url.host_str().unwrap_or_default();
    if host != "flickr.com" && !host.ends_with(".flickr.com") {
        return Err(invalid());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        ["photos", user, "albums" | "sets", id, ..] => Ok(Album {
            id: id.to_string(),
            user_id: user.to_string(),
        }),
        _ => Err(invalid()),
    }
}

pub struct FlickrHandler {
    client: Client,
    config: FlickrConfig,
}

impl FlickrHandler {
    pub fn new(config: FlickrConfig) -> Result<Self, SourceError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &[(&str, &str)],
        not_found: &str,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("method", method),
                ("api_key", self.config.api_key.as_str()),
                ("format", "json"),
                ("nojsoncallback", "1"),
            ])
            .query(params)
            .send()
            .await
            .map_err(request_failed)?;

        let envelope: serde_json::Value = read_json(response, not_found).await?;
        if envelope.get("stat").and_then(|s| s.as_str()) != Some("ok") {
            let message = envelope
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(SourceError::InvalidResponse(format!(
                "Flickr API error: {}",
                message
            )));
        }

        serde_json::from_value(envelope)
            .map_err(|e| SourceError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    async fn album_page(&self, album: &Album, page: u32) -> Result<Photoset, SourceError> {
        debug!(album = %album.id, page = page, "Fetching Flickr album page");
        let page = page.to_string();
        let per_page = self.config.page_size.clamp(1, 500).to_string();
        let response: PhotosetResponse = self
            .call(
                "flickr.photosets.getPhotos",
                &[
                    ("photoset_id", album.id.as_str()),
                    ("user_id", album.user_id.as_str()),
                    ("page", page.as_str()),
                    ("per_page", per_page.as_str()),
                    ("extras", PHOTO_EXTRAS),
                ],
                &album.id,
            )
            .await?;
        Ok(response.photoset)
    }

    /// Every page of an album. Pages after the first are fetched concurrently.
    async fn album_pages(&self, album: &Album) -> Result<Vec<Photoset>, SourceError> {
        let first = self.album_page(album, 1).await?;
        let pages = first.pages.as_u32().unwrap_or(1);

        let rest = try_join_all((2..=pages).map(|page| self.album_page(album, page))).await?;
        let mut all = Vec::with_capacity(rest.len() + 1);
        all.push(first);
        all.extend(rest);
        Ok(all)
    }
}

#[async_trait]
impl SourceHandler for FlickrHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Flickr
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<MediaItem>, SourceError> {
        let album = parse_album_url(collection)?;
        let pages = self.album_pages(&album).await?;

        let mut items = Vec::new();
        for page in pages {
            let owner = page.owner_defaults();
            for photo in page.photo {
                items.push(to_media_item(photo, &owner, Some(&album.id))?);
            }
        }
        info!(album = %album.id, items = items.len(), "Fetched Flickr album");
        Ok(items)
    }

    async fn fetch_image_metadata(&self, id: &str) -> Result<MediaItem, SourceError> {
        let response: PhotoInfoResponse = self
            .call("flickr.photos.getInfo", &[("photo_id", id)], id)
            .await?;
        info_to_media_item(response.photo)
    }

    async fn fetch_existing(&self, ids: &[String]) -> Result<HashSet<String>, SourceError> {
        match &self.config.existing_property {
            Some(property) => {
                query_existing(&self.client, &self.config.query_service_url, property, ids).await
            }
            None => Ok(HashSet::new()),
        }
    }

    async fn fetch_collection_ids(&self, collection: &str) -> Result<Vec<String>, SourceError> {
        let album = parse_album_url(collection)?;
        let pages = self.album_pages(&album).await?;
        Ok(pages
            .into_iter()
            .flat_map(|page| page.photo.into_iter().map(|p| p.id))
            .collect())
    }

    /// Walks the album pages until every requested id is found, so a batch
    /// costs at most one pass over the album.
    async fn fetch_batch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<MediaItem>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let album = parse_album_url(collection)?;

        let mut wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut found: HashMap<String, MediaItem> = HashMap::with_capacity(ids.len());
        let mut page = 1;
        loop {
            let photoset = self.album_page(&album, page).await?;
            let pages = photoset.pages.as_u32().unwrap_or(1);
            let owner = photoset.owner_defaults();

            for photo in photoset.photo {
                if !wanted.remove(photo.id.as_str()) {
                    continue;
                }
                match to_media_item(photo, &owner, Some(&album.id)) {
                    Ok(item) => {
                        found.insert(item.id.clone(), item);
                    }
                    Err(e) => warn!("Skipping malformed Flickr photo: {}", e),
                }
            }

            if wanted.is_empty() || page >= pages {
                break;
            }
            page += 1;
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn open_original(&self, item: &MediaItem) -> Result<ByteStream, SourceError> {
        stream_original(&self.client, item).await
    }
}

/// A JSON value Flickr sends either as a number or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Flex {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Flex {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Flex::Int(n) => Some(*n as f64),
            Flex::Float(f) => Some(*f),
            Flex::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_u32(&self) -> Option<u32> {
        self.as_f64()
            .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
    }
}

#[derive(Debug, Deserialize)]
struct PhotosetResponse {
    photoset: Photoset,
}

#[derive(Debug, Deserialize)]
struct Photoset {
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    ownername: Option<String>,
    pages: Flex,
    #[serde(default)]
    photo: Vec<RawPhoto>,
}

impl Photoset {
    fn owner_defaults(&self) -> OwnerDefaults {
        OwnerDefaults {
            nsid: self.owner.clone(),
            name: self.ownername.clone(),
        }
    }
}

/// Album-level owner, used when a photo does not name its own.
#[derive(Debug, Clone, Default)]
struct OwnerDefaults {
    nsid: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    datetaken: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    ownername: Option<String>,
    #[serde(default)]
    pathalias: Option<String>,
    #[serde(default)]
    latitude: Option<Flex>,
    #[serde(default)]
    longitude: Option<Flex>,
    #[serde(default)]
    url_o: Option<String>,
    #[serde(default)]
    url_l: Option<String>,
    #[serde(default)]
    url_q: Option<String>,
    #[serde(default)]
    url_s: Option<String>,
    #[serde(default)]
    width_o: Option<Flex>,
    #[serde(default)]
    height_o: Option<Flex>,
    #[serde(default)]
    width_l: Option<Flex>,
    #[serde(default)]
    height_l: Option<Flex>,
}

fn parse_taken(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

/// `None` for Flickr's "no location" of 0,0.
fn geo_point(latitude: Option<&Flex>, longitude: Option<&Flex>) -> Option<GeoPoint> {
    let latitude = latitude?.as_f64()?;
    let longitude = longitude?.as_f64()?;
    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }
    Some(GeoPoint {
        latitude,
        longitude,
        compass_angle: None,
    })
}

fn file_title(title: Option<&str>, id: &str, taken_at: Option<DateTime<Utc>>) -> String {
    let title = title.map(str::trim).unwrap_or_default();
    let title = if title.is_empty() {
        let date = taken_at
            .map(|t| t.date_naive().to_string())
            .unwrap_or_else(|| "undated".to_string());
        format!("Photo from Flickr {} ({})", date, id)
    } else {
        title.to_string()
    };

    let lower = title.to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        title
    } else {
        format!("{}.jpg", title)
    }
}

fn to_media_item(
    photo: RawPhoto,
    owner: &OwnerDefaults,
    album_id: Option<&str>,
) -> Result<MediaItem, SourceError> {
    let nsid = photo
        .owner
        .or_else(|| owner.nsid.clone())
        .ok_or_else(|| SourceError::InvalidResponse(format!("photo {} has no owner", photo.id)))?;
    let path_alias = photo
        .pathalias
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| nsid.clone());
    let taken_at = photo.datetaken.as_deref().and_then(parse_taken);

    Ok(MediaItem {
        title: file_title(photo.title.as_deref(), &photo.id, taken_at),
        page_url: Some(format!(
            "https://www.flickr.com/photos/{}/{}",
            path_alias, photo.id
        )),
        source: SourceKind::Flickr,
        collection: album_id.map(str::to_string),
        original_url: photo.url_o.unwrap_or_default(),
        thumbnail_url: photo.url_q.or(photo.url_s),
        taken_at,
        creator: Some(Creator {
            username: photo.ownername.or_else(|| owner.name.clone()),
            profile_url: Some(format!("https://www.flickr.com/people/{}/", path_alias)),
            id: nsid,
        }),
        location: geo_point(photo.latitude.as_ref(), photo.longitude.as_ref()),
        width: photo
            .width_o
            .or(photo.width_l)
            .as_ref()
            .and_then(Flex::as_u32),
        height: photo
            .height_o
            .or(photo.height_l)
            .as_ref()
            .and_then(Flex::as_u32),
        camera_make: None,
        camera_model: None,
        id: photo.id,
    })
}

#[derive(Debug, Deserialize)]
struct PhotoInfoResponse {
    photo: PhotoInfo,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "_content", default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct InfoOwner {
    nsid: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    path_alias: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoDates {
    #[serde(default)]
    taken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoLocation {
    #[serde(default)]
    latitude: Option<Flex>,
    #[serde(default)]
    longitude: Option<Flex>,
}

#[derive(Debug, Deserialize)]
struct PhotoInfo {
    id: String,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    originalsecret: Option<String>,
    #[serde(default)]
    originalformat: Option<String>,
    owner: InfoOwner,
    #[serde(default)]
    title: Option<Content>,
    #[serde(default)]
    dates: Option<InfoDates>,
    #[serde(default)]
    location: Option<InfoLocation>,
}

/// `flickr.photos.getInfo` carries no size urls; the original is addressed
/// through its static path instead.
fn info_to_media_item(info: PhotoInfo) -> Result<MediaItem, SourceError> {
    let original_url = match (&info.server, &info.originalsecret) {
        (Some(server), Some(secret)) => format!(
            "https://live.staticflickr.com/{}/{}_{}_o.{}",
            server,
            info.id,
            secret,
            info.originalformat.as_deref().unwrap_or("jpg")
        ),
        _ => {
            return Err(SourceError::InvalidResponse(format!(
                "photo {} has no downloadable original",
                info.id
            )))
        }
    };

    let photo = RawPhoto {
        id: info.id,
        title: info.title.map(|t| t.content),
        datetaken: info.dates.and_then(|d| d.taken),
        owner: Some(info.owner.nsid),
        ownername: info.owner.username,
        pathalias: info.owner.path_alias,
        latitude: info.location.as_ref().and_then(|l| l.latitude.clone()),
        longitude: info.location.as_ref().and_then(|l| l.longitude.clone()),
        url_o: Some(original_url),
        url_l: None,
        url_q: None,
        url_s: None,
        width_o: None,
        height_o: None,
        width_l: None,
        height_l: None,
    };
    to_media_item(photo, &OwnerDefaults::default(), None)
}
