//! Business rule validation for events
//!
//! Rules are plain functions enumerated in a [`RuleValidator`]; each one
//! inspects an [`Event`] and reports zero or more [`Violation`]s.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Field path
    pub field: String,

    /// Value that was rejected, if any
    pub rejected_value: Option<String>,

    /// Human readable reason
    pub reason: String,
}

impl Violation {
    /// Create new violation
    pub fn new(field: &str, rejected_value: Option<&str>, reason: &str) -> Self {
        Self {
            field: field.to_string(),
            rejected_value: rejected_value.map(str::to_string),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] = [{}]: {}",
            self.field,
            self.rejected_value.as_deref().unwrap_or("null"),
            self.reason
        )
    }
}

/// Validation capability
pub trait EventValidator: Send + Sync {
    /// Check the event, returning every violation found
    fn validate(&self, event: &Event) -> Result<(), Vec<Violation>>;
}

/// Rule over an event
pub type Rule = fn(&Event) -> Option<Violation>;

/// Validator applying a fixed list of rules
#[derive(Clone)]
pub struct RuleValidator {
    rules: Vec<(&'static str, Rule)>,
}

impl RuleValidator {
    /// Validator with the standard event rules
    pub fn new() -> Self {
        Self::empty().with_rule("reference-required", reference_required)
    }

    /// Validator without rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule
    pub fn with_rule(mut self, name: &'static str, rule: Rule) -> Self {
        self.rules.push((name, rule));
        self
    }

    /// Registered rule names
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|(name, _)| *name).collect()
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuleValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleValidator")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl EventValidator for RuleValidator {
    fn validate(&self, event: &Event) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> = self
            .rules
            .iter()
            .filter_map(|(name, rule)| {
                let violation = rule(event);
                if violation.is_some() {
                    debug!("Rule {} rejected event", name);
                }
                violation
            })
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        warn!("Validation violations found:");
        for violation in &violations {
            warn!(
                field = %violation.field,
                rejected_value = violation.rejected_value.as_deref().unwrap_or("null"),
                "    - {}",
                violation.reason
            );
        }

        Err(violations)
    }
}

/// `reference` must be present and not blank
pub fn reference_required(event: &Event) -> Option<Violation> {
    match event.reference() {
        None => Some(Violation::new("reference", None, "reference must not be null")),
        Some(reference) if reference.trim().is_empty() => Some(Violation::new(
            "reference",
            Some(reference),
            "reference must not be blank",
        )),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_event_passes() {
        let validator = RuleValidator::new();
        assert!(validator.validate(&Event::new("REF1")).is_ok());
    }

    #[test]
    fn test_missing_reference() {
        let validator = RuleValidator::new();
        let event: Event = serde_json::from_str(r#"{"status":"OPEN"}"#).unwrap();

        let violations = validator.validate(&event).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "reference");
        assert_eq!(violations[0].rejected_value, None);
    }

    #[test]
    fn test_blank_reference() {
        let validator = RuleValidator::new();

        let violations = validator.validate(&Event::new("   ")).unwrap_err();
        assert_eq!(violations[0].rejected_value.as_deref(), Some("   "));
        assert_eq!(violations[0].to_string(), "[reference] = [   ]: reference must not be blank");
    }

    #[test]
    fn test_custom_rules_accumulate() {
        fn status_required(event: &Event) -> Option<Violation> {
            event
                .status()
                .is_none()
                .then(|| Violation::new("status", None, "status must not be null"))
        }

        let validator = RuleValidator::new().with_rule("status-required", status_required);
        assert_eq!(validator.rule_names(), vec!["reference-required", "status-required"]);

        let event: Event = serde_json::from_str("{}").unwrap();
        let violations = validator.validate(&event).unwrap_err();
        assert_eq!(violations.len(), 2);

        assert!(RuleValidator::empty().validate(&event).is_ok());
    }
}
