use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QsValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<QsValue>),
    Map(BTreeMap<String, QsValue>),
}

impl QsValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::String(value) => value.trim().parse::<f64>().ok(),
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[QsValue]> {
        match self {
            Self::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Human-readable rendering. Integral numbers print without a
    /// fractional part so loop indices read as "1", not "1.0".
    pub fn render(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => render_number(*value),
            Self::String(value) => value.clone(),
            Self::List(values) => {
                let parts = values.iter().map(QsValue::render).collect::<Vec<_>>();
                format!("[{}]", parts.join(", "))
            }
            Self::Map(entries) => {
                let parts = entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value.render()))
                    .collect::<Vec<_>>();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }

    /// Truthiness used by flow commands: the literal "true" (any case) or
    /// a boolean true. Everything else is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::String(value) => value.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

impl From<&str> for QsValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for QsValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for QsValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

fn render_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
