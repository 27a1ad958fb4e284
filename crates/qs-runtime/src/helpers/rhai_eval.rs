use std::collections::BTreeMap;

use qs_core::{QsValue, QueueScriptError};
use regex::Regex;
use rhai::{Array, Dynamic, Engine, ImmutableString, Map, Scope, FLOAT, INT};

use crate::engine::{ExpressionEvaluator, VarScope};

/// Expression evaluator backed by an embedded Rhai engine. `${expr}`
/// spans evaluate as Rhai expressions over the current variables and
/// `$name` is shorthand for the variable itself; a token that is a
/// single span keeps its typed result, anything else interpolates the
/// rendered form into the surrounding text. Variable names reach Rhai
/// lowercased, matching the scope's case folding.
#[derive(Debug, Default)]
pub struct RhaiEvaluator;

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(&self, raw: &str, scope: &VarScope) -> Result<QsValue, QueueScriptError> {
        if !raw.contains('$') {
            return Ok(QsValue::String(raw.to_string()));
        }

        let regex = Regex::new(r"\$\{([^{}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("expression regex must compile");

        if let Some(captures) = regex.captures(raw) {
            let full = captures
                .get(0)
                .expect("capture group 0 must exist for each regex capture");
            if full.start() == 0 && full.end() == raw.len() {
                return eval_expression(expression_text(&captures), scope);
            }
        }

        let mut output = String::new();
        let mut last_index = 0usize;
        for captures in regex.captures_iter(raw) {
            let full = captures
                .get(0)
                .expect("capture group 0 must exist for each regex capture");
            let value = eval_expression(expression_text(&captures), scope)?;
            output.push_str(&raw[last_index..full.start()]);
            output.push_str(&value.render());
            last_index = full.end();
        }
        output.push_str(&raw[last_index..]);
        Ok(QsValue::String(output))
    }
}

fn expression_text<'a>(captures: &'a regex::Captures<'a>) -> &'a str {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .expect("expression reference must capture a body")
        .as_str()
}

fn eval_expression(expr: &str, scope: &VarScope) -> Result<QsValue, QueueScriptError> {
    let mut rhai_scope = Scope::new();
    for (name, value) in scope.to_map() {
        rhai_scope.push_dynamic(name, qsvalue_to_dynamic(&value)?);
    }

    let mut engine = Engine::new();
    engine.set_strict_variables(true);

    engine
        .eval_with_scope::<Dynamic>(&mut rhai_scope, &format!("({})", expr))
        .map_err(|error| {
            QueueScriptError::new(
                "ENGINE_EVAL_ERROR",
                format!("Expression \"{}\" failed: {}", expr, error),
            )
        })
        .and_then(dynamic_to_qsvalue)
}

fn qsvalue_to_dynamic(value: &QsValue) -> Result<Dynamic, QueueScriptError> {
    match value {
        QsValue::Bool(value) => Ok(Dynamic::from_bool(*value)),
        QsValue::Number(value) => Ok(Dynamic::from_float(*value as FLOAT)),
        QsValue::String(value) => Ok(Dynamic::from(value.clone())),
        QsValue::List(values) => {
            let mut array = Array::new();
            for value in values {
                array.push(qsvalue_to_dynamic(value)?);
            }
            Ok(Dynamic::from_array(array))
        }
        QsValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.clone().into(), qsvalue_to_dynamic(value)?);
            }
            Ok(Dynamic::from_map(map))
        }
    }
}

fn dynamic_to_qsvalue(value: Dynamic) -> Result<QsValue, QueueScriptError> {
    if value.is::<bool>() {
        return Ok(QsValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(QsValue::Number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        return Ok(QsValue::Number(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(QsValue::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_qsvalue(item)?);
        }
        return Ok(QsValue::List(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_qsvalue(value)?);
        }
        return Ok(QsValue::Map(out));
    }

    Err(QueueScriptError::new(
        "ENGINE_VALUE_UNSUPPORTED",
        "Unsupported Rhai value type.",
    ))
}
