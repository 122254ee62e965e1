use std::cmp::Ordering;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_normalization::UnicodeNormalization;

use crate::equality::{compare_values, values_equal};
use crate::{
    AxiaError, AxiaResult, DataType, Id, PartitionId, TypedValue, ValuePair, ValueRecord,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ValuePredicate {
    /// Raw input interpreted with the row's data type, compared semantically.
    Equals { value: JsonValue },
    /// Case-insensitive substring over strings and document string leaves.
    Contains { text: String },
    /// Inclusive bounds for ordered types.
    Range {
        min: Option<JsonValue>,
        max: Option<JsonValue>,
    },
    /// Dotted path into a document (`$.a.b.0`), compared structurally.
    JsonPath { path: String, equals: JsonValue },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueFilter {
    pub owner_entity_id: Option<Id>,
    pub attribute_id: Option<Id>,
    pub data_type: Option<DataType>,
    pub is_valid: Option<bool>,
    pub current_only: bool,
    pub include_inactive: bool,
    pub predicates: Vec<ValuePredicate>,
}

impl Default for ValueFilter {
    fn default() -> Self {
        Self {
            owner_entity_id: None,
            attribute_id: None,
            data_type: None,
            is_valid: None,
            current_only: true,
            include_inactive: false,
            predicates: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    #[default]
    CreatedAt,
    Version,
    EffectiveFrom,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ValueOrdering {
    pub field: OrderField,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListValuesInput {
    pub partition: PartitionId,
    pub filter: ValueFilter,
    pub ordering: ValueOrdering,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValuePage {
    pub items: Vec<ValueRecord>,
    pub total_count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryInput {
    pub pair: ValuePair,
    pub limit: u32,
    pub cursor: Option<String>,
}

/// Most recent first. `next_cursor` is `None` once the chain is exhausted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<ValueRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct HistoryCursor {
    before_version: i64,
}

pub fn encode_history_cursor(before_version: i64) -> AxiaResult<String> {
    let payload = serde_json::to_vec(&HistoryCursor { before_version })
        .map_err(|err| AxiaError::storage(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(payload))
}

pub fn decode_history_cursor(cursor: &str) -> AxiaResult<i64> {
    let decoded = URL_SAFE_NO_PAD
        .decode(cursor.as_bytes())
        .map_err(|_| AxiaError::invalid("invalid cursor"))?;
    let parsed: HistoryCursor =
        serde_json::from_slice(&decoded).map_err(|_| AxiaError::invalid("invalid cursor"))?;
    if parsed.before_version < 1 {
        return Err(AxiaError::invalid("invalid cursor"));
    }
    Ok(parsed.before_version)
}

/// Rejects predicates that can never be evaluated, before any rows are read.
pub fn check_predicates(predicates: &[ValuePredicate]) -> AxiaResult<()> {
    for predicate in predicates {
        match predicate {
            ValuePredicate::Range {
                min: None,
                max: None,
            } => return Err(AxiaError::invalid("range predicate needs a bound")),
            ValuePredicate::JsonPath { path, .. } if path_segments(path).is_empty() => {
                return Err(AxiaError::invalid(format!("empty json path '{path}'")));
            }
            _ => {}
        }
    }
    Ok(())
}

/// All predicates must hold. Cleared references match nothing.
pub fn record_matches(record: &ValueRecord, predicates: &[ValuePredicate]) -> bool {
    let Some(value) = record.value() else {
        return predicates.is_empty();
    };
    predicates
        .iter()
        .all(|predicate| predicate_matches(value, predicate))
}

pub fn predicate_matches(value: &TypedValue, predicate: &ValuePredicate) -> bool {
    let data_type = value.data_type();
    match predicate {
        ValuePredicate::Equals { value: raw } => data_type
            .parse_raw(raw)
            .map(|expected| values_equal(value, &expected))
            .unwrap_or(false),
        ValuePredicate::Contains { text } => {
            let needle = normalize_text(text);
            match value {
                TypedValue::String(haystack) => normalize_text(haystack).contains(&needle),
                TypedValue::Document(doc) => document_contains(doc, &needle),
                _ => false,
            }
        }
        ValuePredicate::Range { min, max } => {
            if !data_type.is_ordered() {
                return false;
            }
            let within = |bound: &Option<JsonValue>, reject: Ordering| match bound {
                None => true,
                Some(raw) => match data_type.parse_raw(raw) {
                    Ok(bound) => matches!(
                        compare_values(value, &bound),
                        Some(order) if order != reject
                    ),
                    Err(_) => false,
                },
            };
            within(min, Ordering::Less) && within(max, Ordering::Greater)
        }
        ValuePredicate::JsonPath { path, equals } => match value {
            TypedValue::Document(doc) => {
                resolve_json_path(doc, path).is_some_and(|found| found == equals)
            }
            _ => false,
        },
    }
}

pub fn normalize_text(value: &str) -> String {
    value.trim().nfc().collect::<String>().to_lowercase()
}

fn document_contains(doc: &JsonValue, needle: &str) -> bool {
    match doc {
        JsonValue::String(text) => normalize_text(text).contains(needle),
        JsonValue::Array(items) => items.iter().any(|item| document_contains(item, needle)),
        JsonValue::Object(map) => map.values().any(|item| document_contains(item, needle)),
        _ => false,
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('$').unwrap_or(path);
    trimmed
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect()
}

pub fn resolve_json_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let segments = path_segments(path);
    if segments.is_empty() {
        return None;
    }
    segments
        .into_iter()
        .try_fold(doc, |node, segment| match node {
            JsonValue::Object(map) => map.get(segment),
            JsonValue::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })
}
