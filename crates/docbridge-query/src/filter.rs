//! Evaluation of MongoDB filter, update, sort and projection documents
//! against in-process documents.
//!
//! Covers the subset the builders emit: `$and`, `$or`, `$nor`, the comparison
//! operators, `$in`, `$nin`, `$exists`, `$regex`/`$options` and `$not`;
//! updates with `$set`, `$unset` and `$inc`.

use std::cmp::Ordering;

use bson::{Bson, Document as BsonDocument};
use regex::RegexBuilder;

use crate::Result;
use docbridge_common::BridgeError;

/// Returns true if `doc` satisfies `filter`.
pub fn matches(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => all_match(doc, condition, key)?,
            "$or" => any_match(doc, condition, key)?,
            "$nor" => !any_match(doc, condition, key)?,
            op if op.starts_with('$') => {
                return Err(BridgeError::Constraint(format!(
                    "Unsupported top-level operator '{}'",
                    op
                )))
            }
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(condition: &'a Bson, op: &str) -> Result<Vec<&'a BsonDocument>> {
    let Bson::Array(items) = condition else {
        return Err(BridgeError::Constraint(format!("'{}' expects an array", op)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(BridgeError::Constraint(format!(
                "'{}' expects an array of documents",
                op
            ))),
        })
        .collect()
}

fn all_match(doc: &BsonDocument, condition: &Bson, op: &str) -> Result<bool> {
    for sub in sub_filters(condition, op)? {
        if !matches(doc, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_match(doc: &BsonDocument, condition: &Bson, op: &str) -> Result<bool> {
    for sub in sub_filters(condition, op)? {
        if matches(doc, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolve a dotted path
pub fn lookup<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_operator_document(condition: &Bson) -> Option<&BsonDocument> {
    match condition {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    if let Bson::RegularExpression(_) = condition {
        return regex_matches(value, condition, "");
    }
    let Some(ops) = is_operator_document(condition) else {
        return Ok(equals_or_contains(value, condition));
    };

    let options = ops.get_str("$options").unwrap_or("");
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_or_contains(value, operand),
            "$ne" => !equals_or_contains(value, operand),
            "$gt" => compare_any(value, operand, |o| o == Ordering::Greater),
            "$gte" => compare_any(value, operand, |o| o != Ordering::Less),
            "$lt" => compare_any(value, operand, |o| o == Ordering::Less),
            "$lte" => compare_any(value, operand, |o| o != Ordering::Greater),
            "$in" => in_list(value, operand, op)?,
            "$nin" => !in_list(value, operand, op)?,
            "$exists" => {
                let wanted = match operand {
                    Bson::Boolean(b) => *b,
                    Bson::Int32(i) => *i != 0,
                    Bson::Int64(i) => *i != 0,
                    _ => true,
                };
                value.is_some() == wanted
            }
            "$regex" => regex_matches(value, operand, options)?,
            "$options" => true,
            "$not" => !field_matches(value, operand)?,
            other => {
                return Err(BridgeError::Constraint(format!(
                    "Unsupported filter operator '{}'",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with MongoDB's array semantics: an array field matches if the
/// whole array or any element equals the operand. A missing field equals null.
fn equals_or_contains(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(v) => {
            if values_equal(v, operand) {
                return true;
            }
            match v {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, operand)),
                _ => false,
            }
        }
    }
}

fn in_list(value: Option<&Bson>, operand: &Bson, op: &str) -> Result<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(BridgeError::Constraint(format!("'{}' expects an array", op)));
    };
    Ok(candidates.iter().any(|c| equals_or_contains(value, c)))
}

fn compare_any(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, operand).map_or(false, &accept)),
        Some(v) => compare_values(v, operand).map_or(false, accept),
    }
}

fn regex_matches(value: Option<&Bson>, operand: &Bson, options: &str) -> Result<bool> {
    let (pattern, flags) = match operand {
        Bson::String(p) => (p.as_str(), options),
        Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
        _ => return Err(BridgeError::Constraint("'$regex' expects a string".to_string())),
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| BridgeError::Constraint(format!("Invalid regex '{}': {}", pattern, e)))?;

    Ok(match value {
        Some(Bson::String(s)) => regex.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Equality where numbers compare across BSON numeric types.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between comparable values of the same BSON family.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => Some((x.time, x.increment).cmp(&(y.time, y.increment))),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Sort rank used to order values of different types (nulls first).
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(Bson::Timestamp(_)) => 8,
        Some(_) => 9,
    }
}

/// Sort documents in place by a `{field: 1 | -1}` specification.
pub fn sort_documents(docs: &mut [BsonDocument], sort: &BsonDocument) {
    let keys: Vec<(String, bool)> = sort
        .iter()
        .map(|(field, dir)| {
            let descending = as_f64(dir).map_or(false, |d| d < 0.0);
            (field.clone(), descending)
        })
        .collect();

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let (va, vb) = (lookup(a, field), lookup(b, field));
            let ordering = match (va, vb) {
                (Some(x), Some(y)) => compare_values(x, y)
                    .unwrap_or_else(|| type_rank(va).cmp(&type_rank(vb))),
                _ => type_rank(va).cmp(&type_rank(vb)),
            };
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply an inclusion projection; `_id` is kept unless excluded explicitly.
pub fn project(doc: &BsonDocument, projection: &BsonDocument) -> BsonDocument {
    if projection.is_empty() {
        return doc.clone();
    }
    let keep_id = !matches!(projection.get("_id"), Some(v) if as_f64(v) == Some(0.0) || *v == Bson::Boolean(false));

    let mut projected = BsonDocument::new();
    if keep_id {
        if let Some(id) = doc.get("_id") {
            projected.insert("_id", id.clone());
        }
    }
    for (field, include) in projection {
        if field == "_id" {
            continue;
        }
        let included = match include {
            Bson::Boolean(b) => *b,
            other => as_f64(other).map_or(true, |v| v != 0.0),
        };
        if included {
            if let Some(value) = doc.get(field) {
                projected.insert(field.clone(), value.clone());
            }
        }
    }
    projected
}

/// Apply an update document made of `$set`, `$unset` and `$inc`.
pub fn apply_update(doc: &mut BsonDocument, update: &BsonDocument) -> Result<()> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(BridgeError::Constraint(format!(
                "Update operator '{}' expects a document",
                op
            )));
        };
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
            }
            "$unset" => {
                for (field, _) in fields {
                    doc.remove(field);
                }
            }
            "$inc" => {
                for (field, amount) in fields {
                    let current = doc.get(field).cloned().unwrap_or(Bson::Int32(0));
                    let next = add_numbers(&current, amount).ok_or_else(|| {
                        BridgeError::Store(format!("Cannot apply $inc to non-numeric field '{}'", field))
                    })?;
                    doc.insert(field.clone(), next);
                }
            }
            other => {
                return Err(BridgeError::Constraint(format!(
                    "Unsupported update operator '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => match x.checked_add(*y) {
            Some(sum) => Some(Bson::Int32(sum)),
            None => Some(Bson::Int64(i64::from(*x) + i64::from(*y))),
        },
        (Bson::Int32(x), Bson::Int64(y)) => Some(Bson::Int64(i64::from(*x) + y)),
        (Bson::Int64(x), Bson::Int32(y)) => Some(Bson::Int64(x + i64::from(*y))),
        (Bson::Int64(x), Bson::Int64(y)) => Some(Bson::Int64(x + y)),
        _ => Some(Bson::Double(as_f64(a)? + as_f64(b)?)),
    }
}
