use qs_core::QsValue;

use super::lifecycle::QueueScriptEngine;
use super::queue::QueueId;

impl QueueScriptEngine {
    /// Boolean expression over a flat token list, used by if/else/while.
    /// Malformed input evaluates to false rather than erroring; script
    /// authors get permissive conditions, never crashes.
    pub(crate) fn eval_condition(&self, id: QueueId, tokens: &[String]) -> bool {
        evaluate_tokens(self, id, tokens)
    }

    /// Condition operand: evaluation failures fall back to the raw
    /// token so comparisons degrade instead of faulting.
    pub(crate) fn eval_operand(&self, id: QueueId, raw: &str) -> QsValue {
        self.eval_raw(id, raw)
            .unwrap_or_else(|_| QsValue::String(raw.to_string()))
    }
}

fn evaluate_tokens(engine: &QueueScriptEngine, id: QueueId, tokens: &[String]) -> bool {
    let mut tokens = tokens.to_vec();

    // Parenthesized groups resolve innermost-out; each collapses to its
    // boolean result before the operator passes run.
    while let Some(open) = tokens.iter().position(|token| token == "(") {
        let mut depth = 0usize;
        let mut close = None;
        for (index, token) in tokens.iter().enumerate().skip(open) {
            if token == "(" {
                depth += 1;
            } else if token == ")" {
                depth -= 1;
                if depth == 0 {
                    close = Some(index);
                    break;
                }
            }
        }
        let Some(close) = close else {
            return false;
        };
        let inner = evaluate_tokens(engine, id, &tokens[open + 1..close]);
        let replacement = if inner { "true" } else { "false" };
        tokens.splice(open..=close, [replacement.to_string()]);
    }
    if tokens.iter().any(|token| token == ")") {
        return false;
    }

    if tokens.iter().any(|token| token == "||") {
        return tokens
            .split(|token| token == "||")
            .any(|side| evaluate_tokens(engine, id, side));
    }
    if tokens.iter().any(|token| token == "&&") {
        return tokens
            .split(|token| token == "&&")
            .all(|side| evaluate_tokens(engine, id, side));
    }

    match tokens.len() {
        1 => engine
            .eval_operand(id, &tokens[0])
            .render()
            .eq_ignore_ascii_case("true"),
        3 => compare(engine, id, &tokens[0], &tokens[1], &tokens[2]),
        _ => false,
    }
}

fn compare(engine: &QueueScriptEngine, id: QueueId, lhs: &str, op: &str, rhs: &str) -> bool {
    let lhs = engine.eval_operand(id, lhs);
    let rhs = engine.eval_operand(id, rhs);
    match op {
        "==" => lhs.render() == rhs.render(),
        "!=" => lhs.render() != rhs.render(),
        ">=" | "<=" | ">" | "<" => {
            let (Some(left), Some(right)) = (lhs.as_number(), rhs.as_number()) else {
                return false;
            };
            match op {
                ">=" => left >= right,
                "<=" => left <= right,
                ">" => left > right,
                _ => left < right,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod eval_bool_tests {
    use std::collections::BTreeMap;

    use super::super::runtime_test_support::*;
    use super::*;

    fn condition(source_vars: &[(&str, &str)], tokens: &[&str]) -> bool {
        let vars: BTreeMap<String, QsValue> = source_vars
            .iter()
            .map(|(name, value)| ((*name).to_string(), QsValue::from(*value)))
            .collect();
        // A suspended queue keeps its scope alive for the evaluation.
        let (engine, _output, queue_id) = run_source_with_vars("wait 100", vars);
        let tokens: Vec<String> = tokens.iter().map(|token| (*token).to_string()).collect();
        engine.eval_condition(queue_id, &tokens)
    }

    #[test]
    fn single_token_compares_to_the_literal_true() {
        assert!(condition(&[], &["true"]));
        assert!(condition(&[], &["TRUE"]));
        assert!(!condition(&[], &["false"]));
        assert!(!condition(&[], &["1"]));
        assert!(condition(&[("flag", "true")], &["$flag"]));
    }

    #[test]
    fn three_tokens_compare_strings_and_numbers() {
        assert!(condition(&[], &["a", "==", "a"]));
        assert!(condition(&[], &["a", "!=", "b"]));
        assert!(condition(&[], &["10", ">", "9"]));
        assert!(condition(&[], &["2.5", "<=", "2.5"]));
        assert!(condition(&[("hp", "12")], &["$hp", ">=", "10"]));
        // Numeric parse failure is a failed comparison, not a crash.
        assert!(!condition(&[], &["abc", ">", "1"]));
        assert!(!condition(&[], &["1", "<", "abc"]));
        assert!(!condition(&[], &["a", "~=", "b"]));
    }

    #[test]
    fn or_binds_looser_than_and() {
        assert!(condition(&[], &["false", "||", "true"]));
        assert!(!condition(&[], &["false", "&&", "true"]));
        // a || b && c parses as a || (b && c)
        assert!(condition(&[], &["true", "||", "false", "&&", "false"]));
        assert!(!condition(&[], &["false", "||", "true", "&&", "false"]));
    }

    #[test]
    fn parentheses_group_innermost_out() {
        assert!(condition(
            &[],
            &["(", "false", "||", "true", ")", "&&", "true"]
        ));
        assert!(!condition(
            &[],
            &["(", "true", "&&", "(", "false", ")", ")", "||", "false"]
        ));
    }

    #[test]
    fn malformed_input_is_false_not_an_error() {
        assert!(!condition(&[], &[]));
        assert!(!condition(&[], &["a", "=="]));
        assert!(!condition(&[], &["(", "true"]));
        assert!(!condition(&[], &["true", ")"]));
        assert!(!condition(&[], &["a", "b", "c", "d"]));
    }

    #[test]
    fn undefined_variables_degrade_to_their_raw_token() {
        assert!(!condition(&[], &["$missing"]));
        assert!(condition(&[], &["$missing", "==", "$missing"]));
        assert!(!condition(&[], &["$missing", ">", "3"]));
    }
}
