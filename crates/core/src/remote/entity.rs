//! Interpretation of entity lookups by site and title.

use serde_json::Value;

use super::types::{RemoteEntity, RemoteError};
use crate::metadata::Statement;

/// Resolve the single entity of a `wbgetentities` response looked up by site and title.
///
/// A lookup for a missing page yields an entity keyed `-1` carrying the site
/// and title; that is an error. An existing page without structured data
/// yields a positive id flagged `missing`; that is `Ok(None)`.
pub fn resolve_entity(response: &Value) -> Result<Option<RemoteEntity>, RemoteError> {
    if let Some(error) = response.get("error") {
        return Err(RemoteError::rejected(
            error["code"].as_str().unwrap_or("unknown"),
            error["info"].as_str().unwrap_or("entity lookup failed"),
        ));
    }

    let entities = response
        .get("entities")
        .and_then(Value::as_object)
        .ok_or_else(|| RemoteError::Protocol("response carries no entities".to_string()))?;

    let (key, entity) = entities
        .iter()
        .next()
        .ok_or_else(|| RemoteError::Protocol("response carries no entities".to_string()))?;

    let missing = entity.get("missing").is_some();
    let page_reference = entity.get("site").is_some() || entity.get("title").is_some();

    if key == "-1" && (missing || page_reference) {
        let title = entity["title"].as_str().unwrap_or("unknown title");
        return Err(RemoteError::rejected(
            "missingtitle",
            format!("file {} does not exist", title),
        ));
    }

    if missing {
        return Ok(None);
    }

    // MediaInfo entities name their claims "statements"
    let grouped = entity
        .get("statements")
        .or_else(|| entity.get("claims"))
        .and_then(Value::as_object);

    let Some(grouped) = grouped else {
        return Ok(None);
    };

    let mut statements = Vec::new();
    for claims in grouped.values() {
        let parsed: Vec<Statement> = serde_json::from_value(claims.clone())
            .map_err(|e| RemoteError::Protocol(format!("invalid statement: {}", e)))?;
        statements.extend(parsed);
    }

    let id = entity["id"].as_str().unwrap_or(key).to_string();
    Ok(Some(RemoteEntity { id, statements }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn depicts(item: u64) -> Value {
        json!({
            "mainsnak": {
                "snaktype": "value",
                "property": "P180",
                "datavalue": {
                    "type": "wikibase-entityid",
                    "value": {"entity-type": "item", "numeric-id": item, "id": format!("Q{}", item)}
                }
            },
            "type": "statement",
            "rank": "normal"
        })
    }

    #[test]
    fn test_missing_page_is_an_error() {
        let response = json!({
            "entities": {
                "-1": {"site": "commonswiki", "title": "File:Nope.jpg", "missing": ""}
            }
        });
        let err = resolve_entity(&response).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { ref code, .. } if code == "missingtitle"));
    }

    #[test]
    fn test_existing_page_without_metadata_is_none() {
        let response = json!({
            "entities": {"M123": {"id": "M123", "missing": ""}}
        });
        assert!(resolve_entity(&response).unwrap().is_none());
    }

    #[test]
    fn test_statements_absent_is_none() {
        let response = json!({
            "entities": {"M5": {"id": "M5", "type": "mediainfo"}}
        });
        assert!(resolve_entity(&response).unwrap().is_none());
    }

    #[test]
    fn test_statements_flattened() {
        let response = json!({
            "entities": {
                "M42": {
                    "id": "M42",
                    "type": "mediainfo",
                    "statements": {"P180": [depicts(5), depicts(146)]}
                }
            }
        });
        let entity = resolve_entity(&response).unwrap().unwrap();
        assert_eq!(entity.id, "M42");
        assert_eq!(entity.statements.len(), 2);
        assert!(entity.statements.iter().all(|s| s.property() == "P180"));
    }

    #[test]
    fn test_api_error_is_rejected() {
        let response = json!({"error": {"code": "no-such-entity", "info": "gone"}});
        assert!(matches!(
            resolve_entity(&response),
            Err(RemoteError::Rejected { .. })
        ));
    }
}
