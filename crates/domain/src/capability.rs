//! Capability — a named, typed, constrained control surface of a device.
//!
//! Three kinds exist:
//!
//! | Kind | Constraint | Default value |
//! |------|------------|---------------|
//! | switch | ordered pair of states (`[off, on]`) | first state |
//! | number | inclusive `[min, max]`, optional unit | `min` |
//! | enum | non-empty list of allowed values | first value |
//!
//! A capability never holds a value that violates its constraint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, InvalidValueError};
use crate::value::CapabilityValue;

/// Unit suffixes stripped from textual numbers before parsing.
const KNOWN_UNITS: &[&str] = &["°C", "°F", "°", "%", "度", "分钟", "小时", "秒"];

/// The kind of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Switch,
    Number,
    Enum,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch => f.write_str("switch"),
            Self::Number => f.write_str("number"),
            Self::Enum => f.write_str("enum"),
        }
    }
}

/// The set of values a capability accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    /// `states[0]` is the off state, `states[1]` the on state.
    Switch { states: [String; 2] },
    Number {
        min: f64,
        max: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Enum { values: Vec<String> },
}

impl Constraint {
    #[must_use]
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Switch { .. } => CapabilityKind::Switch,
            Self::Number { .. } => CapabilityKind::Number,
            Self::Enum { .. } => CapabilityKind::Enum,
        }
    }

    /// Normalize `value` into the canonical representation for this
    /// constraint, or return `None` when it is not acceptable.
    fn admit(&self, value: &CapabilityValue) -> Option<CapabilityValue> {
        match (self, value) {
            (Self::Switch { states }, CapabilityValue::Bool(on)) => {
                Some(CapabilityValue::Text(states[usize::from(*on)].clone()))
            }
            (Self::Switch { states }, CapabilityValue::Text(text)) => states
                .iter()
                .any(|state| state == text)
                .then(|| value.clone()),
            (Self::Number { min, max, .. }, CapabilityValue::Number(n)) => {
                in_range(*n, *min, *max).then_some(CapabilityValue::Number(*n))
            }
            (Self::Number { min, max, unit }, CapabilityValue::Text(text)) => {
                parse_number(text, unit.as_deref())
                    .filter(|n| in_range(*n, *min, *max))
                    .map(CapabilityValue::Number)
            }
            (Self::Enum { values }, CapabilityValue::Text(text)) => values
                .iter()
                .any(|allowed| allowed == text)
                .then(|| value.clone()),
            (Self::Enum { values }, CapabilityValue::Number(n)) => {
                let rendered = n.to_string();
                values
                    .iter()
                    .any(|allowed| *allowed == rendered)
                    .then_some(CapabilityValue::Text(rendered))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch { states } => write!(f, "one of [{}, {}]", states[0], states[1]),
            Self::Number { min, max, unit } => {
                write!(f, "a number between {min} and {max}")?;
                if let Some(unit) = unit {
                    write!(f, " {unit}")?;
                }
                Ok(())
            }
            Self::Enum { values } => write!(f, "one of [{}]", values.join(", ")),
        }
    }
}

fn in_range(n: f64, min: f64, max: f64) -> bool {
    n.is_finite() && n >= min && n <= max
}

/// Parse a textual number, tolerating a trailing unit such as `"75%"`,
/// `"21.5 °C"` or `"30分钟"`, and whitespace anywhere.
fn parse_number(text: &str, unit: Option<&str>) -> Option<f64> {
    let mut trimmed = text.trim();
    if let Some(unit) = unit.filter(|u| !u.is_empty()) {
        trimmed = trimmed.strip_suffix(unit).unwrap_or(trimmed).trim_end();
    }
    for suffix in KNOWN_UNITS {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            trimmed = stripped.trim_end();
            break;
        }
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    compact.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A named control surface with its constraint and current value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    name: String,
    constraint: Constraint,
    current_value: CapabilityValue,
}

impl Capability {
    /// Create a switch capability. `states` must hold exactly `[off, on]`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::SwitchStates`] when `states` does not hold
    /// exactly two entries.
    pub fn switch(name: impl Into<String>, states: Vec<String>) -> Result<Self, DefinitionError> {
        let name = non_empty_name(name.into())?;
        let count = states.len();
        let states: [String; 2] = states.try_into().map_err(|_| DefinitionError::SwitchStates {
            capability: name.clone(),
            count,
        })?;
        let current_value = CapabilityValue::Text(states[0].clone());
        Ok(Self {
            name,
            constraint: Constraint::Switch { states },
            current_value,
        })
    }

    /// Create a number capability bounded by `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvertedRange`] when `min > max` and
    /// [`DefinitionError::NonFiniteBound`] when a bound is NaN or infinite.
    pub fn number(
        name: impl Into<String>,
        min: f64,
        max: f64,
        unit: Option<String>,
    ) -> Result<Self, DefinitionError> {
        let name = non_empty_name(name.into())?;
        if !min.is_finite() || !max.is_finite() {
            return Err(DefinitionError::NonFiniteBound { capability: name });
        }
        if min > max {
            return Err(DefinitionError::InvertedRange {
                capability: name,
                min,
                max,
            });
        }
        Ok(Self {
            name,
            constraint: Constraint::Number { min, max, unit },
            current_value: CapabilityValue::Number(min),
        })
    }

    /// Create an enum capability accepting exactly `values`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::EmptyEnum`] when `values` is empty.
    pub fn enumeration(
        name: impl Into<String>,
        values: Vec<String>,
    ) -> Result<Self, DefinitionError> {
        let name = non_empty_name(name.into())?;
        let Some(first) = values.first().cloned() else {
            return Err(DefinitionError::EmptyEnum { capability: name });
        };
        Ok(Self {
            name,
            constraint: Constraint::Enum { values },
            current_value: CapabilityValue::Text(first),
        })
    }

    /// Replace the default value with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InitialValue`] when `value` violates the
    /// constraint.
    pub fn with_initial(mut self, value: &CapabilityValue) -> Result<Self, DefinitionError> {
        self.current_value = self
            .validate(value)
            .map_err(DefinitionError::InitialValue)?;
        Ok(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> CapabilityKind {
        self.constraint.kind()
    }

    #[must_use]
    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    #[must_use]
    pub fn current_value(&self) -> &CapabilityValue {
        &self.current_value
    }

    /// Check `value` against the constraint and return its canonical form.
    ///
    /// Textual numbers are parsed after stripping a unit suffix; booleans are
    /// accepted by switches and mapped to `[off, on]`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when `value` is not acceptable.
    pub fn validate(&self, value: &CapabilityValue) -> Result<CapabilityValue, InvalidValueError> {
        self.constraint
            .admit(value)
            .ok_or_else(|| InvalidValueError {
                capability: self.name.clone(),
                attempted: value.clone(),
                constraint: self.constraint.clone(),
            })
    }

    /// Validate and store `value`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] and leaves the capability untouched when
    /// `value` is not acceptable.
    pub fn set(&mut self, value: &CapabilityValue) -> Result<CapabilityValue, InvalidValueError> {
        let admitted = self.validate(value)?;
        Ok(self.replace(admitted))
    }

    /// Store an already-validated value.
    pub(crate) fn replace(&mut self, value: CapabilityValue) -> CapabilityValue {
        std::mem::replace(&mut self.current_value, value)
    }

    /// The on state of a switch.
    #[must_use]
    pub fn on_state(&self) -> Option<&str> {
        match &self.constraint {
            Constraint::Switch { states } => Some(&states[1]),
            _ => None,
        }
    }

    /// Whether a switch currently holds its on state. `None` for other kinds.
    #[must_use]
    pub fn is_on(&self) -> Option<bool> {
        self.on_state()
            .map(|on| self.current_value.as_text() == Some(on))
    }
}

fn non_empty_name(name: String) -> Result<String, DefinitionError> {
    if name.is_empty() {
        return Err(DefinitionError::EmptyField("capability name"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power() -> Capability {
        Capability::switch("power", vec!["off".to_string(), "on".to_string()]).unwrap()
    }

    fn brightness() -> Capability {
        Capability::number("brightness", 0.0, 100.0, Some("%".to_string())).unwrap()
    }

    fn mode() -> Capability {
        Capability::enumeration(
            "mode",
            vec!["eco".to_string(), "normal".to_string(), "turbo".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn should_default_to_first_state_for_switch() {
        assert_eq!(power().current_value(), &CapabilityValue::from("off"));
        assert_eq!(power().is_on(), Some(false));
    }

    #[test]
    fn should_default_to_min_for_number() {
        let cap = Capability::number("temp", 16.0, 30.0, None).unwrap();
        assert_eq!(cap.current_value(), &CapabilityValue::Number(16.0));
    }

    #[test]
    fn should_default_to_first_value_for_enum() {
        assert_eq!(mode().current_value(), &CapabilityValue::from("eco"));
    }

    #[test]
    fn should_reject_switch_without_two_states() {
        let result = Capability::switch("power", vec!["on".to_string()]);
        assert!(matches!(
            result,
            Err(DefinitionError::SwitchStates { count: 1, .. })
        ));
    }

    #[test]
    fn should_reject_inverted_range() {
        let result = Capability::number("brightness", 10.0, 0.0, None);
        assert!(matches!(result, Err(DefinitionError::InvertedRange { .. })));
    }

    #[test]
    fn should_reject_empty_enum() {
        let result = Capability::enumeration("mode", vec![]);
        assert!(matches!(result, Err(DefinitionError::EmptyEnum { .. })));
    }

    #[test]
    fn should_accept_number_bounds_inclusively() {
        let cap = brightness();
        assert!(cap.validate(&CapabilityValue::Number(0.0)).is_ok());
        assert!(cap.validate(&CapabilityValue::Number(100.0)).is_ok());
        assert!(cap.validate(&CapabilityValue::Number(100.5)).is_err());
        assert!(cap.validate(&CapabilityValue::Number(-0.1)).is_err());
    }

    #[test]
    fn should_reject_non_finite_numbers() {
        let cap = brightness();
        assert!(cap.validate(&CapabilityValue::Number(f64::NAN)).is_err());
        assert!(cap.validate(&CapabilityValue::Number(f64::INFINITY)).is_err());
    }

    #[test]
    fn should_parse_textual_number_with_unit_suffix() {
        let cap = brightness();
        assert_eq!(
            cap.validate(&CapabilityValue::from("75%")).unwrap(),
            CapabilityValue::Number(75.0)
        );
        assert_eq!(
            cap.validate(&CapabilityValue::from(" 42 ")).unwrap(),
            CapabilityValue::Number(42.0)
        );
    }

    #[test]
    fn should_parse_duration_and_degree_suffixes_with_inner_whitespace() {
        let cap = Capability::number("timer", 0.0, 10_000.0, None).unwrap();
        for (text, expected) in [
            ("30分钟", 30.0),
            ("2 小时", 2.0),
            ("45秒", 45.0),
            ("26度", 26.0),
            ("1 000", 1000.0),
        ] {
            assert_eq!(
                cap.validate(&CapabilityValue::from(text)).unwrap(),
                CapabilityValue::Number(expected),
                "{text}"
            );
        }
    }

    #[test]
    fn should_parse_temperature_suffix() {
        let cap = Capability::number("temperature", -20.0, 50.0, Some("°C".to_string())).unwrap();
        assert_eq!(
            cap.validate(&CapabilityValue::from("21.5 °C")).unwrap(),
            CapabilityValue::Number(21.5)
        );
    }

    #[test]
    fn should_reject_garbage_text_for_number() {
        assert!(brightness().validate(&CapabilityValue::from("bright")).is_err());
    }

    #[test]
    fn should_accept_only_declared_switch_states() {
        let cap = power();
        assert!(cap.validate(&CapabilityValue::from("on")).is_ok());
        assert!(cap.validate(&CapabilityValue::from("ON")).is_err());
        assert!(cap.validate(&CapabilityValue::Number(1.0)).is_err());
    }

    #[test]
    fn should_coerce_bool_to_switch_state() {
        let cap = Capability::switch("lock", vec!["unlocked".to_string(), "locked".to_string()])
            .unwrap();
        assert_eq!(
            cap.validate(&CapabilityValue::Bool(true)).unwrap(),
            CapabilityValue::from("locked")
        );
        assert_eq!(
            cap.validate(&CapabilityValue::Bool(false)).unwrap(),
            CapabilityValue::from("unlocked")
        );
    }

    #[test]
    fn should_accept_only_enum_members() {
        let cap = mode();
        assert!(cap.validate(&CapabilityValue::from("turbo")).is_ok());
        let err = cap.validate(&CapabilityValue::from("bogus")).unwrap_err();
        assert_eq!(err.capability, "mode");
        assert_eq!(err.attempted, CapabilityValue::from("bogus"));
    }

    #[test]
    fn should_match_numeric_enum_members_by_rendering() {
        let cap =
            Capability::enumeration("speed", vec!["1".to_string(), "2".to_string()]).unwrap();
        assert_eq!(
            cap.validate(&CapabilityValue::Number(2.0)).unwrap(),
            CapabilityValue::from("2")
        );
    }

    #[test]
    fn should_leave_value_untouched_when_set_fails() {
        let mut cap = brightness();
        cap.set(&CapabilityValue::Number(40.0)).unwrap();
        assert!(cap.set(&CapabilityValue::Number(400.0)).is_err());
        assert_eq!(cap.current_value(), &CapabilityValue::Number(40.0));
    }

    #[test]
    fn should_return_previous_value_when_set_succeeds() {
        let mut cap = power();
        let old = cap.set(&CapabilityValue::from("on")).unwrap();
        assert_eq!(old, CapabilityValue::from("off"));
        assert_eq!(cap.is_on(), Some(true));
    }

    #[test]
    fn should_reject_initial_value_outside_constraint() {
        let result = brightness().with_initial(&CapabilityValue::Number(120.0));
        assert!(matches!(result, Err(DefinitionError::InitialValue(_))));
    }

    #[test]
    fn should_serialize_constraint_without_tag() {
        let json = serde_json::to_value(power().constraint()).unwrap();
        assert_eq!(json, serde_json::json!({"states": ["off", "on"]}));
    }
}
