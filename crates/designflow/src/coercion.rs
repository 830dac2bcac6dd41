//! Definition-driven coercion of raw parameter values.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::state::{ParamDef, ParamKind, ValueMap};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("Parameter ({name}) is not a valid number ({value})")]
    NotANumber { name: String, value: Value },

    #[error("Parameter ({name}) has no choice matching ({value})")]
    UnknownChoice { name: String, value: Value },
}

/// Converts raw values (typed in a form, read from a URL, restored from
/// storage) into the types their definitions declare.
pub trait ParameterCoercion: Send + Sync {
    fn apply(&self, values: &ValueMap, definitions: &[ParamDef]) -> Result<ValueMap, CoercionError>;
}

/// Converts by definition kind and clamps numbers to `min`/`max`.
///
/// While no definitions are known every value passes through untouched.
/// Once definitions exist, keys without one are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParameterCoercion;

impl ParameterCoercion for DefaultParameterCoercion {
    fn apply(&self, values: &ValueMap, definitions: &[ParamDef]) -> Result<ValueMap, CoercionError> {
        if definitions.is_empty() {
            return Ok(values.clone());
        }
        let mut coerced = ValueMap::new();
        for (name, raw) in values {
            let Some(definition) = definitions.iter().find(|d| &d.name == name) else {
                continue;
            };
            coerced.insert(name.clone(), coerce_one(definition, raw)?);
        }
        Ok(coerced)
    }
}

fn coerce_one(definition: &ParamDef, raw: &Value) -> Result<Value, CoercionError> {
    match &definition.kind {
        ParamKind::Int => {
            let number = parse_number(definition, raw)?.trunc();
            Ok(Value::from(clamp(definition, number) as i64))
        }
        ParamKind::Float | ParamKind::Number | ParamKind::Slider => {
            let number = clamp(definition, parse_number(definition, raw)?);
            Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| not_a_number(definition, raw))
        }
        ParamKind::Checkbox => Ok(Value::Bool(truthy(raw))),
        ParamKind::Choice => choose(definition, raw),
        ParamKind::Text
        | ParamKind::Color
        | ParamKind::Date
        | ParamKind::Email
        | ParamKind::Url
        | ParamKind::Password => Ok(match raw {
            Value::String(_) => raw.clone(),
            Value::Null => Value::String(String::new()),
            other => Value::String(other.to_string()),
        }),
        ParamKind::Group | ParamKind::Other(_) => Ok(raw.clone()),
    }
}

fn parse_number(definition: &ParamDef, raw: &Value) -> Result<f64, CoercionError> {
    let parsed = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|number| number.is_finite())
        .ok_or_else(|| not_a_number(definition, raw))
}

fn not_a_number(definition: &ParamDef, raw: &Value) -> CoercionError {
    CoercionError::NotANumber {
        name: definition.name.clone(),
        value: raw.clone(),
    }
}

fn clamp(definition: &ParamDef, number: f64) -> f64 {
    let number = definition.min.map_or(number, |min| number.max(min));
    definition.max.map_or(number, |max| number.min(max))
}

fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !matches!(text.as_str(), "" | "false" | "0"),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Compare loosely: a URL gives `"2"` where the definition lists `2`.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    left == right || display(left) == display(right)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn choose(definition: &ParamDef, raw: &Value) -> Result<Value, CoercionError> {
    let Some(values) = definition.values.as_deref().filter(|v| !v.is_empty()) else {
        return Ok(raw.clone());
    };
    if let Some(found) = values.iter().find(|candidate| loosely_equal(candidate, raw)) {
        return Ok(found.clone());
    }
    let by_caption = definition.captions.as_deref().and_then(|captions| {
        captions
            .iter()
            .position(|caption| caption == &display(raw))
            .and_then(|index| values.get(index))
    });
    by_caption.cloned().ok_or_else(|| CoercionError::UnknownChoice {
        name: definition.name.clone(),
        value: raw.clone(),
    })
}
