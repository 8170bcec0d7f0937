//! HTTP plumbing shared by the source providers.

use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;

use super::types::{ByteStream, MediaItem, SourceError};

pub(super) fn build_client(timeout_secs: u64) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SourceError::Http(format!("failed to create HTTP client: {}", e)))
}

pub(super) fn request_failed(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else {
        SourceError::Http(e.to_string())
    }
}

/// Decode a JSON response, mapping 404 to `NotFound(not_found)` and any
/// other failure status to `Status`.
pub(super) async fn read_json<T: DeserializeOwned>(
    response: Response,
    not_found: &str,
) -> Result<T, SourceError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound(not_found.to_string()));
    }
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Status {
            status,
            body: body.chars().take(200).collect(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| SourceError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

pub(super) async fn stream_original(
    client: &Client,
    item: &MediaItem,
) -> Result<ByteStream, SourceError> {
    if item.original_url.is_empty() {
        return Err(SourceError::InvalidResponse(format!(
            "item {} has no original url",
            item.id
        )));
    }

    let response = client
        .get(&item.original_url)
        .send()
        .await
        .map_err(request_failed)?;

    if !response.status().is_success() {
        return Err(SourceError::Status {
            status: response.status().as_u16(),
            body: format!("original download for {}", item.id),
        });
    }

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(request_failed))
        .boxed())
}

/// Ask the repository's SPARQL endpoint which ids already have a file
/// carrying them under `property`.
pub(super) async fn query_existing(
    client: &Client,
    query_service_url: &str,
    property: &str,
    ids: &[String],
) -> Result<HashSet<String>, SourceError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let response = client
        .post(query_service_url)
        .header("Accept", "application/sparql-results+json")
        .form(&[("query", existing_files_query(property, ids))])
        .send()
        .await
        .map_err(request_failed)?;

    let body: serde_json::Value = read_json(response, query_service_url).await?;
    Ok(parse_existing_ids(&body))
}

fn existing_files_query(property: &str, ids: &[String]) -> String {
    let values = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "SELECT ?file ?id WHERE {{ VALUES ?id {{ {} }} ?file wdt:{} ?id. }}",
        values, property
    )
}

fn parse_existing_ids(body: &serde_json::Value) -> HashSet<String> {
    body.pointer("/results/bindings")
        .and_then(|b| b.as_array())
        .map(|bindings| {
            bindings
                .iter()
                .filter_map(|b| b.pointer("/id/value").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_files_query() {
        let query = existing_files_query("P1947", &["1".to_string(), "2\"".to_string()]);
        assert!(query.contains("VALUES ?id { \"1\" \"2\" }"));
        assert!(query.contains("wdt:P1947"));
    }

    #[test]
    fn test_parse_existing_ids() {
        let body = serde_json::json!({
            "results": {"bindings": [
                {"file": {"value": "https://commons.wikimedia.org/entity/M1"}, "id": {"value": "1"}},
                {"file": {"value": "https://commons.wikimedia.org/entity/M2"}, "id": {"value": "1"}},
                {"file": {"value": "https://commons.wikimedia.org/entity/M3"}, "id": {"value": "3"}}
            ]}
        });
        let ids = parse_existing_ids(&body);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("1"));
        assert!(ids.contains("3"));
        assert!(parse_existing_ids(&serde_json::json!({})).is_empty());
    }
}
