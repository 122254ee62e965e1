use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    AssignmentMeta, AttributeMeta, AxiaError, AxiaResult, FieldError, Id, RuleSet, TypedValue,
    ValidationCode,
};

/// How rule violations are treated on write.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Parse only; rules are not evaluated.
    Off,
    /// Store-with-warnings: constraint violations persist with `is_valid = false`.
    Warn,
    #[default]
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub value: Option<TypedValue>,
    pub errors: Vec<FieldError>,
    pub required: bool,
    pub reference_class: Option<Id>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.value.is_some() && self.errors.is_empty()
    }

    /// Whether a write may proceed. Under `Warn` only constraint violations are tolerated;
    /// type, required and reference failures always reject.
    pub fn is_persistable(&self, mode: ValidationMode) -> bool {
        if self.value.is_none() {
            return false;
        }
        match mode {
            ValidationMode::Warn => self
                .errors
                .iter()
                .all(|err| err.code == ValidationCode::ConstraintViolation),
            ValidationMode::Off | ValidationMode::Error => self.errors.is_empty(),
        }
    }

    pub fn reference_target(&self) -> Option<Id> {
        self.value.as_ref().and_then(TypedValue::as_reference)
    }

    fn rejected(errors: Vec<FieldError>, rules: &RuleSet) -> Self {
        Self {
            value: None,
            errors,
            required: rules.is_required(),
            reference_class: rules.reference_class(),
        }
    }
}

/// Assignment-time check: the assignment binds this attribute, the overlay only narrows the
/// base rules, and any default value satisfies the merged rules.
pub fn check_assignment(
    attribute: &AttributeMeta,
    assignment: &AssignmentMeta,
) -> AxiaResult<RuleSet> {
    if assignment.attribute_id != attribute.attribute_id {
        return Err(AxiaError::precondition(format!(
            "assignment {} binds attribute {}, not {}",
            assignment.assignment_id, assignment.attribute_id, attribute.attribute_id
        )));
    }
    let rules = RuleSet::merge(
        attribute.data_type,
        &attribute.base_rules,
        &assignment.overlay_rules,
        assignment.is_required,
    )?;
    if let Some(default) = assignment.default_value.as_ref().filter(|raw| !raw.is_null()) {
        let value = attribute.data_type.parse_raw(default).map_err(|err| {
            AxiaError::configuration(format!(
                "default value for '{}' does not parse: {err}",
                attribute.name
            ))
        })?;
        let violations = rules.check(&attribute.name, &value);
        if !violations.is_empty() {
            return Err(AxiaError::configuration(format!(
                "default value for '{}' violates its rules: {}",
                attribute.name,
                AxiaError::validation(violations)
            )));
        }
    }
    Ok(rules)
}

/// Parses `raw` against the attribute's data type and evaluates the merged rule set.
/// Field-level failures come back inside the outcome; `Err` is reserved for
/// configuration and precondition problems.
pub fn validate(
    attribute: &AttributeMeta,
    assignment: &AssignmentMeta,
    raw: &JsonValue,
    mode: ValidationMode,
) -> AxiaResult<ValidationOutcome> {
    let rules = check_assignment(attribute, assignment)?;
    let field = attribute.name.as_str();

    let input = match (raw, assignment.default_value.as_ref()) {
        (JsonValue::Null, Some(default)) => default,
        _ => raw,
    };
    if input.is_null() {
        let error = if rules.is_required() {
            FieldError::new(field, ValidationCode::RequiredMissing, "a value is required")
        } else {
            FieldError::new(
                field,
                ValidationCode::TypeMismatch,
                "null is not a value; delete the value instead",
            )
        };
        return Ok(ValidationOutcome::rejected(vec![error], &rules));
    }

    let value = match attribute.data_type.parse_raw(input) {
        Ok(value) => value,
        Err(message) => {
            let error = FieldError::new(field, ValidationCode::TypeMismatch, message);
            return Ok(ValidationOutcome::rejected(vec![error], &rules));
        }
    };

    let errors = match mode {
        ValidationMode::Off => Vec::new(),
        ValidationMode::Warn | ValidationMode::Error => rules.check(field, &value),
    };
    Ok(ValidationOutcome {
        value: Some(value),
        errors,
        required: rules.is_required(),
        reference_class: rules.reference_class(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ValidationMode, check_assignment, validate};
    use crate::{
        AssignmentMeta, AttributeMeta, AxiaError, DataType, Id, TypedValue, ValidationCode,
        ValidationRules,
    };

    fn attribute(name: &str, data_type: DataType, base_rules: ValidationRules) -> AttributeMeta {
        AttributeMeta {
            attribute_id: Id::new(),
            name: name.to_string(),
            data_type,
            base_rules,
        }
    }

    fn assignment(attribute: &AttributeMeta) -> AssignmentMeta {
        AssignmentMeta {
            assignment_id: Id::new(),
            owner_class_id: Id::new(),
            attribute_id: attribute.attribute_id,
            is_required: false,
            overlay_rules: ValidationRules::default(),
            default_value: None,
        }
    }

    fn email() -> AttributeMeta {
        attribute(
            "email",
            DataType::String,
            ValidationRules {
                pattern: Some("^[^@]+@[^@]+$".to_string()),
                ..ValidationRules::default()
            },
        )
    }

    #[test]
    fn pattern_violation_is_reported_per_field() {
        let attr = email();
        let assign = assignment(&attr);
        let ok = validate(&attr, &assign, &json!("a@b.com"), ValidationMode::Error).expect("ok");
        assert!(ok.is_valid());
        let bad =
            validate(&attr, &assign, &json!("not-an-email"), ValidationMode::Error).expect("bad");
        assert!(!bad.is_valid());
        assert_eq!(bad.errors[0].field, "email");
        assert_eq!(bad.errors[0].code, ValidationCode::ConstraintViolation);
        assert!(!bad.is_persistable(ValidationMode::Error));
        assert!(bad.is_persistable(ValidationMode::Warn));
    }

    #[test]
    fn unparsable_input_is_a_type_mismatch() {
        let attr = attribute("score", DataType::Integer, ValidationRules::default());
        let assign = assignment(&attr);
        let outcome =
            validate(&attr, &assign, &json!("seven"), ValidationMode::Warn).expect("outcome");
        assert!(outcome.value.is_none());
        assert_eq!(outcome.errors[0].code, ValidationCode::TypeMismatch);
        assert!(!outcome.is_persistable(ValidationMode::Warn));
    }

    #[test]
    fn null_uses_default_then_required() {
        let attr = attribute("status", DataType::String, ValidationRules::default());
        let mut assign = assignment(&attr);
        assign.default_value = Some(json!("draft"));
        let outcome = validate(&attr, &assign, &json!(null), ValidationMode::Error).expect("ok");
        assert_eq!(outcome.value, Some(TypedValue::String("draft".into())));

        assign.default_value = None;
        assign.is_required = true;
        let outcome = validate(&attr, &assign, &json!(null), ValidationMode::Error).expect("ok");
        assert_eq!(outcome.errors[0].code, ValidationCode::RequiredMissing);

        let outcome = validate(&attr, &assign, &json!(""), ValidationMode::Error).expect("ok");
        assert_eq!(outcome.errors[0].code, ValidationCode::RequiredMissing);
    }

    #[test]
    fn off_mode_skips_rules_but_still_parses() {
        let attr = email();
        let assign = assignment(&attr);
        let outcome =
            validate(&attr, &assign, &json!("no-at-sign"), ValidationMode::Off).expect("ok");
        assert!(outcome.is_valid());
        let outcome = validate(&attr, &assign, &json!(12), ValidationMode::Off).expect("ok");
        assert_eq!(outcome.errors[0].code, ValidationCode::TypeMismatch);
    }

    #[test]
    fn assignment_for_another_attribute_is_a_precondition_error() {
        let attr = email();
        let mut assign = assignment(&attr);
        assign.attribute_id = Id::new();
        let err = check_assignment(&attr, &assign).expect_err("mismatch");
        assert!(matches!(err, AxiaError::Precondition { .. }));
    }

    #[test]
    fn invalid_default_is_a_configuration_error() {
        let attr = email();
        let mut assign = assignment(&attr);
        assign.default_value = Some(json!("nobody"));
        let err = check_assignment(&attr, &assign).expect_err("default");
        assert!(matches!(err, AxiaError::Configuration { .. }));
    }
}
