//! Remotely supplied conditions that can put the sensor on hold.
//!
//! A [`Subscription`] couples one shared decoder (topic match, scalar or
//! nested-JSON extraction) with a [`Condition`] that decides whether the
//! last decoded value currently allows sampling.
//!
//! ```text
//!  bus message ──▶ matches_topic? ──▶ extract(payload) ──▶ value
//!                                                          │
//!                                        verify() ◀── Condition::{Range, OnHold}
//! ```
//!
//! Decoding never fails past this boundary: a payload that cannot be
//! decoded leaves "no value", which each condition interprets on its own.

use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Payload tokens that mean "hold", compared after upper-casing and
/// stripping whitespace and underscores.
const HOLD_TOKENS: [&str; 5] = ["HOLD", "ONHOLD", "TRUE", "STOP", "1"];

/// Placeholder some publishers send when they have no value.
const NO_VALUE_PLACEHOLDER: &str = "-";

/// How a subscription is configured: a bare topic (scalar payload) or a
/// topic followed by the attribute path into a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicSpec {
    Topic(String),
    Path(Vec<String>),
}

/// Variant-specific verification.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Satisfied while the value parses as a number inside `[min, max]`.
    Range { min: f64, max: f64 },
    /// Satisfied unless the value is one of the hold tokens.
    OnHold,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    /// Config key, used in log lines.
    key: &'static str,
    topic: Option<String>,
    attribute: Option<Vec<String>>,
    value: Option<Value>,
    extract_error: Option<String>,
    condition: Condition,
}

impl Subscription {
    /// An unconfigured range subscription (always satisfied until configured).
    pub fn range(key: &'static str) -> Self {
        Self::with_condition(
            key,
            Condition::Range {
                min: f64::NEG_INFINITY,
                max: f64::INFINITY,
            },
        )
    }

    /// An unconfigured hold-flag subscription.
    pub fn on_hold(key: &'static str) -> Self {
        Self::with_condition(key, Condition::OnHold)
    }

    fn with_condition(key: &'static str, condition: Condition) -> Self {
        Self {
            key,
            topic: None,
            attribute: None,
            value: None,
            extract_error: None,
            condition,
        }
    }

    // ── Configuration ─────────────────────────────────────────

    /// Apply the topic configuration.  `None` leaves the subscription inactive.
    pub fn config(&mut self, spec: Option<&TopicSpec>) -> Result<(), ConfigError> {
        match spec {
            None => {
                self.topic = None;
                self.attribute = None;
            }
            Some(TopicSpec::Topic(topic)) => {
                self.topic = Some(topic.clone()).filter(|t| !t.is_empty());
                self.attribute = None;
            }
            Some(TopicSpec::Path(parts)) => {
                let [topic, attrs @ ..] = parts.as_slice() else {
                    return Err(self.bad_path(parts));
                };
                if attrs.is_empty() {
                    return Err(self.bad_path(parts));
                }
                self.topic = Some(topic.clone());
                self.attribute = Some(attrs.to_vec());
            }
        }
        Ok(())
    }

    fn bad_path(&self, parts: &[String]) -> ConfigError {
        ConfigError::Invalid(format!(
            "'{}' needs a topic and at least one attribute ({:?})",
            self.key, parts
        ))
    }

    /// Set the accepted bounds of a range subscription.  Ignored while the
    /// subscription is inactive or for hold subscriptions.
    pub fn set_range(&mut self, bounds: (f64, f64)) -> Result<(), ConfigError> {
        if !self.is_active() {
            return Ok(());
        }
        if let Condition::Range { min, max } = &mut self.condition {
            let (lo, hi) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
            if lo >= hi {
                return Err(ConfigError::Invalid(format!(
                    "range [{lo}, {hi}] for '{}'",
                    self.key
                )));
            }
            *min = lo;
            *max = hi;
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.topic.is_some()
    }

    pub fn matches_topic(&self, topic: &str) -> bool {
        self.topic.as_deref() == Some(topic)
    }

    /// True while no usable value has been received.
    pub fn missing_value(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Reason the last payload could not be decoded, if it could not.
    pub fn extract_error(&self) -> Option<&str> {
        self.extract_error.as_deref()
    }

    // ── Decoding ──────────────────────────────────────────────

    /// Store the value carried by `payload`.
    pub fn extract(&mut self, payload: &str) {
        match &self.attribute {
            None => {
                self.value = Some(Value::String(payload.to_owned()));
                self.extract_error = None;
            }
            Some(path) => match descend(payload, path) {
                Ok(value) => {
                    self.value = Some(value);
                    self.extract_error = None;
                }
                Err(reason) => {
                    error!("Cannot extract '{}' from '{}': {}", self.key, payload, reason);
                    self.value = None;
                    self.extract_error = Some(reason);
                }
            },
        }
    }

    // ── Verification ──────────────────────────────────────────

    /// Whether the condition currently allows sampling.  Pure: never mutates.
    pub fn verify(&self) -> bool {
        if !self.is_active() {
            return true;
        }
        match self.condition {
            Condition::Range { min, max } => self.verify_range(min, max),
            Condition::OnHold => self.verify_not_holding(),
        }
    }

    fn verify_range(&self, min: f64, max: f64) -> bool {
        let Some(value) = &self.value else {
            info!("No subscription value '{}' available!", self.key);
            return false;
        };
        let number = match value {
            Value::String(s) if s == NO_VALUE_PLACEHOLDER => {
                info!("No value for '{}' available!", self.key);
                return false;
            }
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        let Some(number) = number.filter(|n| !n.is_nan()) else {
            info!("Cannot convert '{}' value ({}) to a number!", self.key, value);
            return false;
        };
        if number < min || number > max {
            info!(
                "'{}' ({}) outside range [{}, {}].",
                self.key, number, min, max
            );
            return false;
        }
        true
    }

    fn verify_not_holding(&self) -> bool {
        let Some(value) = &self.value else {
            return true;
        };
        let normalised: String = value_text(value)
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_uppercase();
        if HOLD_TOKENS.contains(&normalised.as_str()) {
            info!("'ON HOLD' by '{}'.", self.key);
            return false;
        }
        true
    }
}

/// Decode `payload` as a JSON object and walk `path` into it.
fn descend(payload: &str, path: &[String]) -> Result<Value, String> {
    let root: Value = serde_json::from_str(payload).map_err(|e| e.to_string())?;
    if !root.is_object() {
        return Err("JSON object expected".to_owned());
    }
    let mut current = root;
    for attribute in path {
        current = match current {
            Value::Object(mut map) => map
                .remove(attribute)
                .ok_or_else(|| format!("missing attribute '{attribute}'"))?,
            other => return Err(format!("cannot descend into '{other}' for '{attribute}'")),
        };
    }
    Ok(current)
}

/// Textual form of a decoded value, the way a publisher would spell it.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        other => other.to_string(),
    }
}
