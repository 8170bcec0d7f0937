//! Remote publish client for the MediaWiki action API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::config::RemoteConfig;
use super::entity::resolve_entity;
use super::retry::{with_retries, RetryPolicy};
use super::traits::PublishClient;
use super::types::{
    ChunkResponse, ChunkUpload, CommitRequest, MetadataEdit, PublishedFile, RemoteEntity,
    RemoteError, TitleCheck,
};

type Params = Vec<(&'static str, String)>;

pub struct MediaWikiClient {
    client: Client,
    config: RemoteConfig,
    retry: RetryPolicy,
}

impl MediaWikiClient {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RemoteError::Protocol(format!("failed to create HTTP client: {}", e)))?;
        let retry = RetryPolicy::from_config(&config);
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    async fn get(
        &self,
        operation: &str,
        credential: &str,
        params: Params,
    ) -> Result<Value, RemoteError> {
        with_retries(&self.retry, operation, || async {
            let response = self
                .client
                .get(&self.config.api_url)
                .bearer_auth(credential)
                .query(&[("format", "json"), ("formatversion", "2")])
                .query(&params)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
        .await
    }

    async fn post_form(
        &self,
        operation: &str,
        credential: &str,
        params: Params,
    ) -> Result<Value, RemoteError> {
        with_retries(&self.retry, operation, || async {
            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(credential)
                .query(&[("format", "json"), ("formatversion", "2")])
                .form(&params)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
        .await
    }

    async fn csrf_token(&self, credential: &str) -> Result<String, RemoteError> {
        let data = self
            .get(
                "csrf_token",
                credential,
                vec![
                    ("action", "query".to_string()),
                    ("meta", "tokens".to_string()),
                    ("type", "csrf".to_string()),
                ],
            )
            .await?;
        check_api_error(&data)?;
        data["query"]["tokens"]["csrftoken"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Protocol("response carries no CSRF token".to_string()))
    }
}

#[async_trait]
impl PublishClient for MediaWikiClient {
    async fn user_groups(&self, credential: &str) -> Result<Vec<String>, RemoteError> {
        let data = self
            .get(
                "user_groups",
                credential,
                vec![
                    ("action", "query".to_string()),
                    ("meta", "userinfo".to_string()),
                    ("uiprop", "groups".to_string()),
                ],
            )
            .await?;
        check_api_error(&data)?;

        let groups = data["query"]["userinfo"]["groups"]
            .as_array()
            .ok_or_else(|| RemoteError::Protocol("response carries no user groups".to_string()))?;
        Ok(groups
            .iter()
            .filter_map(|g| g.as_str().map(str::to_string))
            .collect())
    }

    async fn check_title(&self, credential: &str, title: &str) -> Result<TitleCheck, RemoteError> {
        let data = self
            .get(
                "check_title",
                credential,
                vec![
                    ("action", "titleblacklist".to_string()),
                    ("tbaction", "create".to_string()),
                    ("tbtitle", format!("File:{}", title)),
                ],
            )
            .await?;
        check_api_error(&data)?;
        Ok(parse_title_check(&data))
    }

    async fn upload_chunk(
        &self,
        credential: &str,
        chunk: ChunkUpload,
    ) -> Result<ChunkResponse, RemoteError> {
        let token = self.csrf_token(credential).await?;

        let data = with_retries(&self.retry, "upload_chunk", || async {
            let mut form = Form::new()
                .text("action", "upload")
                .text("format", "json")
                .text("formatversion", "2")
                .text("stash", "1")
                .text("filename", chunk.filename.clone())
                .text("offset", chunk.offset.to_string())
                .text("filesize", chunk.filesize.to_string())
                .text("token", token.clone())
                .part("chunk", Part::bytes(chunk.data.to_vec()).file_name("chunk"));
            if let Some(ref filekey) = chunk.filekey {
                form = form.text("filekey", filekey.clone());
            }

            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(credential)
                .multipart(form)
                .send()
                .await
                .map_err(transport_error)?;
            read_json(response).await
        })
        .await?;

        check_api_error(&data)?;
        let parsed = parse_chunk_response(&data)?;
        debug!(
            filename = %chunk.filename,
            offset = chunk.offset,
            result = %parsed.result,
            "Chunk stashed"
        );
        Ok(parsed)
    }

    async fn commit(
        &self,
        credential: &str,
        request: CommitRequest,
    ) -> Result<PublishedFile, RemoteError> {
        let token = self.csrf_token(credential).await?;
        let data = self
            .post_form(
                "commit",
                credential,
                vec![
                    ("action", "upload".to_string()),
                    ("filename", request.filename.clone()),
                    ("filekey", request.filekey.clone()),
                    ("comment", request.comment.clone()),
                    ("text", request.wikitext.clone()),
                    ("token", token),
                ],
            )
            .await?;
        check_api_error(&data)?;

        let upload = &data["upload"];
        match upload["result"].as_str() {
            Some("Success") => {
                let title = upload["filename"]
                    .as_str()
                    .unwrap_or(&request.filename)
                    .to_string();
                let url = upload["imageinfo"]["descriptionurl"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.file_url(&title));
                info!(title = %title, "File published");
                Ok(PublishedFile { title, url })
            }
            Some("Warning") => Err(RemoteError::rejected(
                "upload-warning",
                upload["warnings"].to_string(),
            )),
            other => Err(RemoteError::Protocol(format!(
                "unexpected upload result: {:?}",
                other
            ))),
        }
    }

    async fn fetch_entity_by_title(
        &self,
        credential: &str,
        title: &str,
    ) -> Result<Option<RemoteEntity>, RemoteError> {
        let data = self
            .get(
                "fetch_entity",
                credential,
                vec![
                    ("action", "wbgetentities".to_string()),
                    ("sites", self.config.site.clone()),
                    ("titles", format!("File:{}", title)),
                    ("props", "claims".to_string()),
                ],
            )
            .await?;
        resolve_entity(&data)
    }

    async fn write_metadata(
        &self,
        credential: &str,
        edit: MetadataEdit,
    ) -> Result<(), RemoteError> {
        let token = self.csrf_token(credential).await?;
        let data = self
            .post_form(
                "write_metadata",
                credential,
                vec![
                    ("action", "wbeditentity".to_string()),
                    ("site", self.config.site.clone()),
                    ("title", format!("File:{}", edit.title)),
                    ("data", metadata_payload(&edit).to_string()),
                    ("summary", edit.summary.clone()),
                    ("token", token),
                    ("bot", "0".to_string()),
                ],
            )
            .await?;
        check_api_error(&data)?;
        info!(title = %edit.title, statements = edit.statements.len(), "Structured metadata written");
        Ok(())
    }

    fn file_url(&self, title: &str) -> String {
        file_page_url(&self.config.site_url, title)
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RemoteError::Transient(e.to_string())
    } else {
        RemoteError::Protocol(e.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, RemoteError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(RemoteError::Transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::rejected(
            format!("http-{}", status.as_u16()),
            body.chars().take(200).collect::<String>(),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| RemoteError::Protocol(format!("Failed to parse response: {}", e)))
}

fn check_api_error(data: &Value) -> Result<(), RemoteError> {
    match data.get("error") {
        Some(error) => Err(RemoteError::rejected(
            error["code"].as_str().unwrap_or("unknown"),
            error["info"].as_str().unwrap_or("request failed"),
        )),
        None => Ok(()),
    }
}

fn parse_title_check(data: &Value) -> TitleCheck {
    let result = &data["titleblacklist"];
    if result["result"].as_str() == Some("blacklisted") {
        TitleCheck::Blacklisted {
            reason: result["reason"]
                .as_str()
                .unwrap_or("Title is blacklisted")
                .to_string(),
        }
    } else {
        TitleCheck::Allowed
    }
}

fn parse_chunk_response(data: &Value) -> Result<ChunkResponse, RemoteError> {
    let upload = data
        .get("upload")
        .ok_or_else(|| RemoteError::Protocol("response carries no upload result".to_string()))?;

    let duplicates = upload["warnings"]["duplicate"]
        .as_array()
        .map(|titles| {
            titles
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ChunkResponse {
        filekey: upload["filekey"].as_str().map(str::to_string),
        result: upload["result"].as_str().unwrap_or_default().to_string(),
        duplicates,
    })
}

fn metadata_payload(edit: &MetadataEdit) -> Value {
    let mut payload = json!({});
    if !edit.statements.is_empty() {
        payload["claims"] = json!(edit.statements);
    }
    if !edit.labels.is_empty() {
        let labels: BTreeMap<&str, &crate::metadata::Label> = edit
            .labels
            .iter()
            .map(|label| (label.language.as_str(), label))
            .collect();
        payload["labels"] = json!(labels);
    }
    payload
}

pub(crate) fn file_page_url(site_url: &str, title: &str) -> String {
    let page = format!("File:{}", title.replace(' ', "_"));
    format!(
        "{}/wiki/{}",
        site_url.trim_end_matches('/'),
        urlencoding::encode(&page).replace("%3A", ":")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataValue, EntityIdValue, Label, Snak, Statement};

    #[test]
    fn test_parse_chunk_response_with_duplicate_warning() {
        let data = json!({
            "upload": {
                "result": "Warning",
                "filekey": "abc.123.jpg",
                "warnings": {"duplicate": ["Existing_photo.jpg"]}
            }
        });
        let parsed = parse_chunk_response(&data).unwrap();
        assert_eq!(parsed.filekey.as_deref(), Some("abc.123.jpg"));
        assert_eq!(parsed.duplicates, vec!["Existing_photo.jpg".to_string()]);
    }

    #[test]
    fn test_parse_chunk_response_continue() {
        let data = json!({"upload": {"result": "Continue", "offset": 2097152, "filekey": "k"}});
        let parsed = parse_chunk_response(&data).unwrap();
        assert_eq!(parsed.result, "Continue");
        assert!(parsed.duplicates.is_empty());
    }

    #[test]
    fn test_check_api_error() {
        let data = json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}});
        assert!(matches!(
            check_api_error(&data),
            Err(RemoteError::Rejected { ref code, .. }) if code == "badtoken"
        ));
        assert!(check_api_error(&json!({"upload": {}})).is_ok());
    }

    #[test]
    fn test_parse_title_check() {
        let blocked = json!({"titleblacklist": {"result": "blacklisted", "reason": "Bad name"}});
        assert_eq!(
            parse_title_check(&blocked),
            TitleCheck::Blacklisted {
                reason: "Bad name".to_string()
            }
        );
        let ok = json!({"titleblacklist": {"result": "ok"}});
        assert_eq!(parse_title_check(&ok), TitleCheck::Allowed);
    }

    #[test]
    fn test_metadata_payload_keys_labels_by_language() {
        let edit = MetadataEdit {
            title: "A.jpg".to_string(),
            statements: vec![Statement::new(Snak::value(
                "P180",
                "wikibase-item",
                DataValue::EntityId(EntityIdValue::item(146)),
            ))],
            labels: vec![Label {
                language: "en".to_string(),
                value: "A cat".to_string(),
            }],
            summary: String::new(),
        };
        let payload = metadata_payload(&edit);
        assert_eq!(payload["claims"][0]["mainsnak"]["property"], "P180");
        assert_eq!(payload["labels"]["en"]["value"], "A cat");
    }

    #[test]
    fn test_file_page_url() {
        assert_eq!(
            file_page_url("https://commons.wikimedia.org/", "Photo from Mapillary (1).jpg"),
            "https://commons.wikimedia.org/wiki/File:Photo_from_Mapillary_%281%29.jpg"
        );
    }
}
