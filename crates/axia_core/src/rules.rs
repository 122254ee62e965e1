use std::cmp::Ordering;
use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::equality::{compare_values, values_equal};
use crate::{AxiaError, AxiaResult, DataType, FieldError, Id, TypedValue, ValidationCode};

/// Declarative constraints carried by an attribute (base) or an assignment (overlay).
/// Bounds and enumerations are raw JSON, interpreted with the attribute's data type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub pattern: Option<String>,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub min_value: Option<JsonValue>,
    pub max_value: Option<JsonValue>,
    pub allowed_values: Option<Vec<JsonValue>>,
    pub required: bool,
    pub required_keys: Vec<String>,
    pub reference_class: Option<Id>,
}

/// Rules compiled against one data type; the result of `base ∩ overlay`.
#[derive(Clone, Debug)]
pub struct RuleSet {
    data_type: DataType,
    patterns: Vec<Regex>,
    min_length: Option<u32>,
    max_length: Option<u32>,
    min_value: Option<TypedValue>,
    max_value: Option<TypedValue>,
    allowed_values: Option<Vec<TypedValue>>,
    required: bool,
    required_keys: BTreeSet<String>,
    reference_class: Option<Id>,
}

impl RuleSet {
    pub fn unconstrained(data_type: DataType) -> Self {
        Self {
            data_type,
            patterns: Vec::new(),
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            allowed_values: None,
            required: false,
            required_keys: BTreeSet::new(),
            reference_class: None,
        }
    }

    pub fn compile(data_type: DataType, rules: &ValidationRules) -> AxiaResult<Self> {
        check_applicable(data_type, rules)?;
        let patterns = rules
            .pattern
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    AxiaError::configuration(format!("invalid pattern '{pattern}': {err}"))
                })
            })
            .collect::<AxiaResult<Vec<_>>>()?;
        let min_value = rules
            .min_value
            .as_ref()
            .map(|raw| parse_rule_value(data_type, "min_value", raw))
            .transpose()?;
        let max_value = rules
            .max_value
            .as_ref()
            .map(|raw| parse_rule_value(data_type, "max_value", raw))
            .transpose()?;
        let allowed_values = rules
            .allowed_values
            .as_ref()
            .map(|values| {
                values
                    .iter()
                    .map(|raw| parse_rule_value(data_type, "allowed_values", raw))
                    .collect::<AxiaResult<Vec<_>>>()
            })
            .transpose()?;
        let set = Self {
            data_type,
            patterns,
            min_length: rules.min_length,
            max_length: rules.max_length,
            min_value,
            max_value,
            allowed_values,
            required: rules.required,
            required_keys: rules.required_keys.iter().cloned().collect(),
            reference_class: rules.reference_class,
        };
        set.ensure_satisfiable()?;
        Ok(set)
    }

    /// Narrow-only merge: ranges intersect, enumerations intersect, patterns conjoin,
    /// `required` from either layer wins. An overlay that widens the base is a
    /// configuration error.
    pub fn merge(
        data_type: DataType,
        base: &ValidationRules,
        overlay: &ValidationRules,
        assignment_required: bool,
    ) -> AxiaResult<Self> {
        let base = Self::compile(data_type, base)?;
        let overlay = Self::compile(data_type, overlay)?;
        let mut widenings = Vec::new();

        if let (Some(base_min), Some(overlay_min)) = (base.min_length, overlay.min_length)
            && overlay_min < base_min
        {
            widenings.push(format!(
                "min_length {overlay_min} is below base minimum {base_min}"
            ));
        }
        if let (Some(base_max), Some(overlay_max)) = (base.max_length, overlay.max_length)
            && overlay_max > base_max
        {
            widenings.push(format!(
                "max_length {overlay_max} exceeds base maximum {base_max}"
            ));
        }
        if let (Some(base_min), Some(overlay_min)) = (&base.min_value, &overlay.min_value)
            && compare_values(overlay_min, base_min) == Some(Ordering::Less)
        {
            widenings.push(format!(
                "min_value {} is below base minimum {}",
                overlay_min.to_raw(),
                base_min.to_raw()
            ));
        }
        if let (Some(base_max), Some(overlay_max)) = (&base.max_value, &overlay.max_value)
            && compare_values(overlay_max, base_max) == Some(Ordering::Greater)
        {
            widenings.push(format!(
                "max_value {} exceeds base maximum {}",
                overlay_max.to_raw(),
                base_max.to_raw()
            ));
        }
        if let (Some(base_allowed), Some(overlay_allowed)) =
            (&base.allowed_values, &overlay.allowed_values)
        {
            for candidate in overlay_allowed {
                if !base_allowed
                    .iter()
                    .any(|allowed| values_equal(allowed, candidate))
                {
                    widenings.push(format!(
                        "allowed value {} is not permitted by the base rules",
                        candidate.to_raw()
                    ));
                }
            }
        }
        if let (Some(base_class), Some(overlay_class)) =
            (base.reference_class, overlay.reference_class)
            && base_class != overlay_class
        {
            widenings.push(format!(
                "reference_class {overlay_class} differs from base class {base_class}"
            ));
        }
        if !widenings.is_empty() {
            return Err(AxiaError::configuration(format!(
                "overlay widens base rules: {}",
                widenings.join("; ")
            )));
        }

        let merged = Self {
            data_type,
            patterns: base.patterns.into_iter().chain(overlay.patterns).collect(),
            min_length: tighter(base.min_length, overlay.min_length, Ordering::Greater),
            max_length: tighter(base.max_length, overlay.max_length, Ordering::Less),
            min_value: tighter_value(base.min_value, overlay.min_value, Ordering::Greater),
            max_value: tighter_value(base.max_value, overlay.max_value, Ordering::Less),
            allowed_values: overlay.allowed_values.or(base.allowed_values),
            required: base.required || overlay.required || assignment_required,
            required_keys: base
                .required_keys
                .into_iter()
                .chain(overlay.required_keys)
                .collect(),
            reference_class: overlay.reference_class.or(base.reference_class),
        };
        merged.ensure_satisfiable()?;
        Ok(merged)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn reference_class(&self) -> Option<Id> {
        self.reference_class
    }

    /// Evaluates every constraint against a parsed value, collecting all violations.
    pub fn check(&self, field: &str, value: &TypedValue) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let violation = |message: String| {
            FieldError::new(field, ValidationCode::ConstraintViolation, message)
        };

        if let TypedValue::String(text) = value {
            if self.required && text.is_empty() {
                errors.push(FieldError::new(
                    field,
                    ValidationCode::RequiredMissing,
                    "a non-empty value is required",
                ));
            }
            let length = text.chars().count() as u64;
            if let Some(min) = self.min_length
                && length < u64::from(min)
            {
                errors.push(violation(format!(
                    "length {length} is below the minimum of {min}"
                )));
            }
            if let Some(max) = self.max_length
                && length > u64::from(max)
            {
                errors.push(violation(format!(
                    "length {length} exceeds the maximum of {max}"
                )));
            }
            for pattern in &self.patterns {
                if !pattern.is_match(text) {
                    errors.push(violation(format!(
                        "value does not match pattern {}",
                        pattern.as_str()
                    )));
                }
            }
        }

        if let Some(min) = &self.min_value
            && compare_values(value, min) == Some(Ordering::Less)
        {
            errors.push(violation(format!(
                "{} is below the minimum of {}",
                value.to_raw(),
                min.to_raw()
            )));
        }
        if let Some(max) = &self.max_value
            && compare_values(value, max) == Some(Ordering::Greater)
        {
            errors.push(violation(format!(
                "{} exceeds the maximum of {}",
                value.to_raw(),
                max.to_raw()
            )));
        }
        if let Some(allowed) = &self.allowed_values
            && !allowed.iter().any(|candidate| values_equal(candidate, value))
        {
            errors.push(violation(format!(
                "{} is not one of the allowed values",
                value.to_raw()
            )));
        }
        if let TypedValue::Document(doc) = value
            && !self.required_keys.is_empty()
        {
            match doc.as_object() {
                Some(object) => {
                    for key in &self.required_keys {
                        if !object.contains_key(key) {
                            errors.push(violation(format!("document is missing key '{key}'")));
                        }
                    }
                }
                None => errors.push(violation(
                    "document must be an object to carry required keys".to_string(),
                )),
            }
        }
        errors
    }

    fn ensure_satisfiable(&self) -> AxiaResult<()> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length)
            && min > max
        {
            return Err(AxiaError::configuration(format!(
                "min_length {min} exceeds max_length {max}"
            )));
        }
        if let (Some(min), Some(max)) = (&self.min_value, &self.max_value)
            && compare_values(min, max) == Some(Ordering::Greater)
        {
            return Err(AxiaError::configuration(format!(
                "min_value {} exceeds max_value {}",
                min.to_raw(),
                max.to_raw()
            )));
        }
        if let Some(allowed) = &self.allowed_values
            && allowed.is_empty()
        {
            return Err(AxiaError::configuration("allowed_values is empty"));
        }
        Ok(())
    }
}

fn tighter(base: Option<u32>, overlay: Option<u32>, prefer: Ordering) -> Option<u32> {
    match (base, overlay) {
        (Some(a), Some(b)) => Some(if b.cmp(&a) == prefer { b } else { a }),
        (a, b) => b.or(a),
    }
}

fn tighter_value(
    base: Option<TypedValue>,
    overlay: Option<TypedValue>,
    prefer: Ordering,
) -> Option<TypedValue> {
    match (base, overlay) {
        (Some(a), Some(b)) => {
            if compare_values(&b, &a) == Some(prefer) {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, b) => b.or(a),
    }
}

fn parse_rule_value(data_type: DataType, rule: &str, raw: &JsonValue) -> AxiaResult<TypedValue> {
    data_type.parse_raw(raw).map_err(|err| {
        AxiaError::configuration(format!(
            "{rule} is not a valid {} value: {err}",
            data_type.as_str()
        ))
    })
}

fn check_applicable(data_type: DataType, rules: &ValidationRules) -> AxiaResult<()> {
    let mut misplaced = Vec::new();
    let is_text = data_type == DataType::String;
    if !is_text && rules.pattern.is_some() {
        misplaced.push("pattern");
    }
    if !is_text && (rules.min_length.is_some() || rules.max_length.is_some()) {
        misplaced.push("length");
    }
    let ranged = matches!(
        data_type,
        DataType::Integer | DataType::Decimal | DataType::Date | DataType::DateTime
    );
    if !ranged && (rules.min_value.is_some() || rules.max_value.is_some()) {
        misplaced.push("min_value/max_value");
    }
    if data_type == DataType::Document && rules.allowed_values.is_some() {
        misplaced.push("allowed_values");
    }
    if data_type != DataType::Document && !rules.required_keys.is_empty() {
        misplaced.push("required_keys");
    }
    if data_type != DataType::Reference && rules.reference_class.is_some() {
        misplaced.push("reference_class");
    }
    if misplaced.is_empty() {
        Ok(())
    } else {
        Err(AxiaError::configuration(format!(
            "{} not applicable to {} attributes",
            misplaced.join(", "),
            data_type.as_str()
        )))
    }
}
