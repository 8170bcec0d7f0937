//! Additive, non-destructive merge of structured metadata.
//!
//! - Properties absent from the existing metadata are added wholesale.
//! - For an existing property, a new statement is folded into the existing
//!   statement with the same main value: qualifiers and references are added
//!   without duplication. Ids, ranks and main snaks are kept.
//! - A new value that conflicts with existing values is dropped.
//! - Properties whose existing statements are coordinates are left untouched.

use super::types::{Reference, Snak, SnakMap, Statement};

/// Result of merging new statements into existing ones.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub statements: Vec<Statement>,
    /// Whether `statements` differs from the existing metadata.
    pub changed: bool,
}

/// Merge `new` into `existing`.
pub fn merge_statements(existing: &[Statement], new: &[Statement]) -> MergeResult {
    let existing_groups = group_by_property(existing);
    let mut new_groups = group_by_property(new);

    let mut merged: Vec<Statement> = Vec::with_capacity(existing.len() + new.len());

    for (property, existing_stmts) in existing_groups {
        let Some(pos) = new_groups.iter().position(|(p, _)| *p == property) else {
            merged.extend(existing_stmts);
            continue;
        };
        let (_, new_stmts) = new_groups.remove(pos);

        if existing_stmts.iter().any(|s| s.mainsnak.is_coordinate()) {
            merged.extend(existing_stmts);
            continue;
        }

        let mut group = existing_stmts;
        for new_stmt in &new_stmts {
            group = merge_statement(group, new_stmt);
        }
        merged.extend(group);
    }

    for (_, new_stmts) in new_groups {
        merged.extend(new_stmts);
    }

    let changed = merged.as_slice() != existing;
    MergeResult {
        statements: merged,
        changed,
    }
}

/// Fold one new statement into the existing statements of its property.
fn merge_statement(mut existing: Vec<Statement>, new: &Statement) -> Vec<Statement> {
    let Some(idx) = existing
        .iter()
        .position(|s| s.mainsnak.same_value(&new.mainsnak))
    else {
        if existing.is_empty() {
            existing.push(new.clone());
        }
        return existing;
    };

    let target = &mut existing[idx];

    let new_qualifiers = new.qualifiers.values().flatten();
    merge_qualifiers(&mut target.qualifiers, &mut target.qualifiers_order, new_qualifiers);
    merge_references(&mut target.references, &new.references);

    existing
}

fn merge_qualifiers<'a>(
    qualifiers: &mut SnakMap,
    order: &mut Vec<String>,
    new: impl Iterator<Item = &'a Snak>,
) {
    for snak in new {
        if snak.property.is_empty() {
            continue;
        }
        let entry = qualifiers.entry(snak.property.clone()).or_default();
        if entry.iter().any(|existing| existing.same_value(snak)) {
            continue;
        }
        entry.push(snak.clone());
        if !order.contains(&snak.property) {
            order.push(snak.property.clone());
        }
    }
}

fn merge_references(existing: &mut Vec<Reference>, new: &[Reference]) {
    let mut seen: Vec<_> = existing.iter().map(Reference::comparison_key).collect();
    for reference in new {
        let key = reference.comparison_key();
        if !seen.contains(&key) {
            existing.push(reference.clone());
            seen.push(key);
        }
    }
}

/// Group statements by property, keeping first-seen property order.
fn group_by_property(statements: &[Statement]) -> Vec<(String, Vec<Statement>)> {
    let mut groups: Vec<(String, Vec<Statement>)> = Vec::new();
    for stmt in statements {
        let property = stmt.property();
        if property.is_empty() {
            continue;
        }
        match groups.iter_mut().find(|(p, _)| p == property) {
            Some((_, group)) => group.push(stmt.clone()),
            None => groups.push((property.to_string(), vec![stmt.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{DataValue, EntityIdValue, GlobeCoordinateValue, SnakType};

    fn depicts(q: u64) -> Statement {
        Statement::new(Snak::value(
            "P180",
            "wikibase-item",
            DataValue::EntityId(EntityIdValue::item(q)),
        ))
    }

    fn string_snak(property: &str, value: &str) -> Snak {
        Snak::value(property, "string", DataValue::String(value.to_string()))
    }

    fn coordinates(lat: f64, lon: f64) -> Statement {
        Statement::new(Snak::value(
            "P1259",
            "globe-coordinate",
            DataValue::GlobeCoordinate(GlobeCoordinateValue {
                latitude: lat,
                longitude: lon,
                altitude: None,
                precision: Some(0.0001),
                globe: "http://www.wikidata.org/entity/Q2".to_string(),
            }),
        ))
    }

    fn source_reference(url: &str) -> Reference {
        let mut snaks = SnakMap::new();
        snaks.insert("P854".to_string(), vec![Snak::value("P854", "url", DataValue::String(url.to_string()))]);
        Reference {
            hash: None,
            snaks,
            snaks_order: vec!["P854".to_string()],
        }
    }

    #[test]
    fn test_new_property_is_added() {
        let existing = vec![depicts(146)];
        let new = vec![Statement::new(string_snak("P1947", "12345"))];

        let result = merge_statements(&existing, &new);

        assert!(result.changed);
        assert_eq!(result.statements.len(), 2);
        assert_eq!(result.statements[1].property(), "P1947");
    }

    #[test]
    fn test_identical_input_is_unchanged() {
        let existing = vec![depicts(146), Statement::new(string_snak("P1947", "12345"))];

        let result = merge_statements(&existing, &existing.clone());

        assert!(!result.changed);
        assert_eq!(result.statements, existing);
    }

    #[test]
    fn test_matching_statement_gains_qualifier_and_keeps_id() {
        let mut existing_stmt = depicts(146);
        existing_stmt.id = Some("M1$abc".to_string());
        existing_stmt.rank = "preferred".to_string();
        let new_stmt = depicts(146).with_qualifier(string_snak("P462", "black"));

        let result = merge_statements(&[existing_stmt], &[new_stmt]);

        assert!(result.changed);
        assert_eq!(result.statements.len(), 1);
        let merged = &result.statements[0];
        assert_eq!(merged.id.as_deref(), Some("M1$abc"));
        assert_eq!(merged.rank, "preferred");
        assert_eq!(merged.qualifiers["P462"].len(), 1);
        assert_eq!(merged.qualifiers_order, vec!["P462".to_string()]);
    }

    #[test]
    fn test_duplicate_qualifier_and_reference_not_added_twice() {
        let existing_stmt = depicts(146)
            .with_qualifier(string_snak("P462", "black"))
            .with_reference(source_reference("https://example.org/a"));
        let mut new_stmt = depicts(146)
            .with_qualifier(string_snak("P462", "black"))
            .with_reference(source_reference("https://example.org/a"));
        new_stmt.references[0].hash = Some("different-hash".to_string());

        let result = merge_statements(&[existing_stmt.clone()], &[new_stmt]);

        assert!(!result.changed);
        assert_eq!(result.statements, vec![existing_stmt]);
    }

    #[test]
    fn test_new_reference_is_appended() {
        let existing_stmt = depicts(146).with_reference(source_reference("https://example.org/a"));
        let new_stmt = depicts(146).with_reference(source_reference("https://example.org/b"));

        let result = merge_statements(&[existing_stmt], &[new_stmt]);

        assert!(result.changed);
        assert_eq!(result.statements[0].references.len(), 2);
    }

    #[test]
    fn test_conflicting_value_is_not_added() {
        let existing = vec![depicts(146)];
        let new = vec![depicts(999)];

        let result = merge_statements(&existing, &new);

        assert!(!result.changed);
        assert_eq!(result.statements, existing);
    }

    #[test]
    fn test_existing_coordinates_are_untouched() {
        let existing = vec![coordinates(45.0, 9.0)];
        let new = vec![coordinates(45.0, 9.0).with_qualifier(string_snak("P4", "x"))];

        let result = merge_statements(&existing, &new);

        assert!(!result.changed);
        assert!(result.statements[0].qualifiers.is_empty());
    }

    #[test]
    fn test_merge_into_empty_existing() {
        let new = vec![depicts(146)];
        let result = merge_statements(&[], &new);
        assert!(result.changed);
        assert_eq!(result.statements, new);
    }

    #[test]
    fn test_somevalue_statements_match() {
        let some = Statement::new(Snak {
            snaktype: SnakType::SomeValue,
            property: "P170".to_string(),
            datatype: None,
            datavalue: None,
            hash: None,
        });
        let new = some.clone().with_qualifier(string_snak("P2093", "Jane Doe"));

        let result = merge_statements(&[some], &[new]);

        assert!(result.changed);
        assert_eq!(result.statements[0].qualifiers["P2093"].len(), 1);
    }
}
