use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::Id;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    String = 1,
    Integer = 2,
    Decimal = 3,
    Boolean = 4,
    Date = 5,
    DateTime = 6,
    Document = 7,
    Reference = 8,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::String,
        DataType::Integer,
        DataType::Decimal,
        DataType::Boolean,
        DataType::Date,
        DataType::DateTime,
        DataType::Document,
        DataType::Reference,
    ];

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(DataType::String),
            2 => Some(DataType::Integer),
            3 => Some(DataType::Decimal),
            4 => Some(DataType::Boolean),
            5 => Some(DataType::Date),
            6 => Some(DataType::DateTime),
            7 => Some(DataType::Document),
            8 => Some(DataType::Reference),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Document => "document",
            DataType::Reference => "reference",
        }
    }

    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            DataType::String
                | DataType::Integer
                | DataType::Decimal
                | DataType::Date
                | DataType::DateTime
        )
    }

    /// Parses a protocol-level JSON input into the typed representation for this data type.
    /// Null is never a value; callers handle absence before parsing.
    pub fn parse_raw(self, raw: &JsonValue) -> Result<TypedValue, String> {
        if raw.is_null() {
            return Err(format!("expected a {} value, got null", self.as_str()));
        }
        match self {
            DataType::String => match raw {
                JsonValue::String(text) => Ok(TypedValue::String(text.clone())),
                other => Err(format!("expected a string, got {}", json_kind(other))),
            },
            DataType::Integer => match raw {
                JsonValue::Number(number) => number
                    .as_i64()
                    .map(TypedValue::Integer)
                    .ok_or_else(|| format!("'{number}' is not a 64-bit integer")),
                JsonValue::String(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(TypedValue::Integer)
                    .map_err(|_| format!("'{text}' is not an integer")),
                other => Err(format!("expected an integer, got {}", json_kind(other))),
            },
            DataType::Decimal => match raw {
                JsonValue::Number(number) => parse_decimal(&number.to_string()),
                JsonValue::String(text) => parse_decimal(text.trim()),
                other => Err(format!("expected a decimal, got {}", json_kind(other))),
            },
            DataType::Boolean => match raw {
                JsonValue::Bool(flag) => Ok(TypedValue::Boolean(*flag)),
                JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(TypedValue::Boolean(true)),
                    "false" => Ok(TypedValue::Boolean(false)),
                    _ => Err(format!("'{text}' is not a boolean")),
                },
                other => Err(format!("expected a boolean, got {}", json_kind(other))),
            },
            DataType::Date => match raw {
                JsonValue::String(text) => parse_date(text.trim())
                    .map(TypedValue::Date)
                    .ok_or_else(|| format!("'{text}' is not a YYYY-MM-DD date")),
                other => Err(format!("expected a date string, got {}", json_kind(other))),
            },
            DataType::DateTime => match raw {
                JsonValue::String(text) => OffsetDateTime::parse(text.trim(), &Rfc3339)
                    .map(TypedValue::DateTime)
                    .map_err(|_| format!("'{text}' is not an RFC 3339 timestamp")),
                other => Err(format!(
                    "expected an RFC 3339 string, got {}",
                    json_kind(other)
                )),
            },
            DataType::Document => Ok(TypedValue::Document(raw.clone())),
            DataType::Reference => match raw {
                JsonValue::String(text) => Id::parse(text.trim())
                    .map(TypedValue::Reference)
                    .map_err(|_| format!("'{text}' is not an entity id")),
                other => Err(format!("expected an entity id, got {}", json_kind(other))),
            },
        }
    }
}

/// The closed tagged union of storable values; exactly one variant per row.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(Date),
    DateTime(OffsetDateTime),
    Document(JsonValue),
    Reference(Id),
}

impl TypedValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::String(_) => DataType::String,
            TypedValue::Integer(_) => DataType::Integer,
            TypedValue::Decimal(_) => DataType::Decimal,
            TypedValue::Boolean(_) => DataType::Boolean,
            TypedValue::Date(_) => DataType::Date,
            TypedValue::DateTime(_) => DataType::DateTime,
            TypedValue::Document(_) => DataType::Document,
            TypedValue::Reference(_) => DataType::Reference,
        }
    }

    /// Protocol-level JSON form; `DataType::parse_raw` accepts it back unchanged.
    pub fn to_raw(&self) -> JsonValue {
        match self {
            TypedValue::String(text) => JsonValue::String(text.clone()),
            TypedValue::Integer(number) => JsonValue::from(*number),
            TypedValue::Decimal(number) => JsonValue::String(canonical_decimal(number)),
            TypedValue::Boolean(flag) => JsonValue::Bool(*flag),
            TypedValue::Date(date) => JsonValue::String(format_date(*date)),
            TypedValue::DateTime(instant) => JsonValue::String(format_datetime(*instant)),
            TypedValue::Document(doc) => doc.clone(),
            TypedValue::Reference(id) => JsonValue::String(id.to_uuid_string()),
        }
    }

    pub fn as_reference(&self) -> Option<Id> {
        match self {
            TypedValue::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TaggedValue {
    #[serde(rename = "type")]
    data_type: DataType,
    value: JsonValue,
}

impl Serialize for TypedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        TaggedValue {
            data_type: self.data_type(),
            value: self.to_raw(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TypedValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tagged = TaggedValue::deserialize(deserializer)?;
        tagged
            .data_type
            .parse_raw(&tagged.value)
            .map_err(serde::de::Error::custom)
    }
}

pub fn canonical_decimal(value: &Decimal) -> String {
    value.normalize().to_string()
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

pub fn parse_date(text: &str) -> Option<Date> {
    Date::parse(text, format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_datetime(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| instant.to_string())
}

fn parse_decimal(text: &str) -> Result<TypedValue, String> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map(TypedValue::Decimal)
        .map_err(|_| format!("'{text}' is not a decimal"))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
