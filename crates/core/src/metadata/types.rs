//! Structured metadata statements in the remote repository's JSON shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snaks grouped by property id.
pub type SnakMap = BTreeMap<String, Vec<Snak>>;

/// Language-tagged caption attached to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub language: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnakType {
    Value,
    SomeValue,
    NoValue,
}

/// A single property/value assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snak {
    pub snaktype: SnakType,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datavalue: Option<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Snak {
    /// Value snak with the given datatype.
    pub fn value(property: impl Into<String>, datatype: &str, datavalue: DataValue) -> Self {
        Self {
            snaktype: SnakType::Value,
            property: property.into(),
            datatype: Some(datatype.to_string()),
            datavalue: Some(datavalue),
            hash: None,
        }
    }

    pub fn is_coordinate(&self) -> bool {
        matches!(self.datavalue, Some(DataValue::GlobeCoordinate(_)))
    }

    /// Key used to decide whether two snaks assert the same thing.
    /// Ignores hashes and presentation-only fields.
    pub fn comparison_key(&self) -> (String, String) {
        let value = match (&self.snaktype, &self.datavalue) {
            (SnakType::NoValue, _) => "novalue".to_string(),
            (SnakType::SomeValue, _) => "somevalue".to_string(),
            (SnakType::Value, None) => "empty".to_string(),
            (SnakType::Value, Some(dv)) => dv.comparison_key(),
        };
        (self.property.clone(), value)
    }

    /// Same property and same value.
    pub fn same_value(&self, other: &Snak) -> bool {
        self.comparison_key() == other.comparison_key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataValue {
    #[serde(rename = "wikibase-entityid")]
    EntityId(EntityIdValue),
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "quantity")]
    Quantity(QuantityValue),
    #[serde(rename = "globecoordinate")]
    GlobeCoordinate(GlobeCoordinateValue),
    #[serde(rename = "time")]
    Time(TimeValue),
    #[serde(rename = "monolingualtext")]
    MonolingualText(MonolingualTextValue),
}

impl DataValue {
    fn comparison_key(&self) -> String {
        match self {
            DataValue::EntityId(v) => match (&v.id, v.numeric_id) {
                (_, Some(n)) => format!("entity:{}:{}", v.entity_type, n),
                (Some(id), None) => format!("entity:{}:{}", v.entity_type, id),
                (None, None) => format!("entity:{}:", v.entity_type),
            },
            DataValue::String(s) => format!("string:{}", s),
            DataValue::Quantity(q) => format!("quantity:{}:{}", q.amount, q.unit),
            DataValue::GlobeCoordinate(c) => format!("coordinate:{}:{}", c.latitude, c.longitude),
            DataValue::Time(t) => format!("time:{}", t.time),
            DataValue::MonolingualText(m) => format!("text:{}:{}", m.language, m.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdValue {
    #[serde(rename = "entity-type")]
    pub entity_type: String,
    #[serde(rename = "numeric-id", default, skip_serializing_if = "Option::is_none")]
    pub numeric_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EntityIdValue {
    pub fn item(numeric_id: u64) -> Self {
        Self {
            entity_type: "item".to_string(),
            numeric_id: Some(numeric_id),
            id: Some(format!("Q{}", numeric_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityValue {
    pub amount: String,
    pub unit: String,
    #[serde(rename = "upperBound", default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
    #[serde(rename = "lowerBound", default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobeCoordinateValue {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default = "default_globe")]
    pub globe: String,
}

fn default_globe() -> String {
    "http://www.wikidata.org/entity/Q2".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub time: String,
    #[serde(default)]
    pub timezone: i64,
    #[serde(default)]
    pub before: i64,
    #[serde(default)]
    pub after: i64,
    #[serde(default = "default_time_precision")]
    pub precision: u8,
    #[serde(default = "default_calendar")]
    pub calendarmodel: String,
}

fn default_time_precision() -> u8 {
    11
}

fn default_calendar() -> String {
    "http://www.wikidata.org/entity/Q1985727".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonolingualTextValue {
    pub text: String,
    pub language: String,
}

/// A sourced reference attached to a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub snaks: SnakMap,
    #[serde(rename = "snaks-order", default, skip_serializing_if = "Vec::is_empty")]
    pub snaks_order: Vec<String>,
}

impl Reference {
    /// Hash-independent identity of the reference content.
    pub fn comparison_key(&self) -> Vec<(String, String, String)> {
        let mut items = Vec::new();
        for (property, snaks) in &self.snaks {
            for snak in snaks {
                let datatype = snak.datatype.clone().unwrap_or_default();
                items.push((property.clone(), datatype, snak.comparison_key().1));
            }
        }
        items
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub mainsnak: Snak,
    #[serde(rename = "type", default = "default_statement_type")]
    pub statement_type: String,
    #[serde(default = "default_rank")]
    pub rank: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "SnakMap::is_empty")]
    pub qualifiers: SnakMap,
    #[serde(rename = "qualifiers-order", default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

fn default_statement_type() -> String {
    "statement".to_string()
}

fn default_rank() -> String {
    "normal".to_string()
}

impl Statement {
    pub fn new(mainsnak: Snak) -> Self {
        Self {
            mainsnak,
            statement_type: default_statement_type(),
            rank: default_rank(),
            id: None,
            qualifiers: SnakMap::new(),
            qualifiers_order: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn with_qualifier(mut self, snak: Snak) -> Self {
        if !self.qualifiers_order.contains(&snak.property) {
            self.qualifiers_order.push(snak.property.clone());
        }
        self.qualifiers.entry(snak.property.clone()).or_default().push(snak);
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    pub fn property(&self) -> &str {
        &self.mainsnak.property
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_parses_remote_shape() {
        let json = serde_json::json!({
            "mainsnak": {
                "snaktype": "value",
                "property": "P180",
                "hash": "abc",
                "datavalue": {
                    "type": "wikibase-entityid",
                    "value": {"entity-type": "item", "numeric-id": 146, "id": "Q146"}
                }
            },
            "type": "statement",
            "id": "M123$uuid",
            "rank": "preferred",
            "qualifiers-order": ["P2096"],
            "qualifiers": {
                "P2096": [{
                    "snaktype": "value",
                    "property": "P2096",
                    "datavalue": {"type": "monolingualtext", "value": {"text": "cat", "language": "en"}}
                }]
            }
        });

        let statement: Statement = serde_json::from_value(json).unwrap();
        assert_eq!(statement.property(), "P180");
        assert_eq!(statement.rank, "preferred");
        assert_eq!(statement.qualifiers["P2096"].len(), 1);
        assert!(matches!(
            statement.mainsnak.datavalue,
            Some(DataValue::EntityId(EntityIdValue { numeric_id: Some(146), .. }))
        ));
    }

    #[test]
    fn test_same_value_ignores_hash() {
        let mut a = Snak::value("P180", "wikibase-item", DataValue::EntityId(EntityIdValue::item(146)));
        let b = a.clone();
        a.hash = Some("deadbeef".to_string());
        assert!(a.same_value(&b));

        let c = Snak::value("P180", "wikibase-item", DataValue::EntityId(EntityIdValue::item(147)));
        assert!(!a.same_value(&c));
    }

    #[test]
    fn test_novalue_snaks_compare_by_property() {
        let a = Snak {
            snaktype: SnakType::NoValue,
            property: "P1".to_string(),
            datatype: None,
            datavalue: None,
            hash: None,
        };
        let mut b = a.clone();
        assert!(a.same_value(&b));
        b.property = "P2".to_string();
        assert!(!a.same_value(&b));
    }
}
