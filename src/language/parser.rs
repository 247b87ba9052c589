use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::{ListValue, ProcValue, Value};
use std::collections::HashMap;

/// Turn a stream of whitespace-delimited words into a token list.
///
/// List literals collect their words verbatim (original case, no further
/// tokenization); `--` cuts the stream short; names found in the procedure
/// table are bound eagerly so the evaluator can drive on arity alone.
pub fn parse<'a, I>(words: I, procedures: &HashMap<String, ProcValue>) -> RuntimeResult<Vec<Value>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut code = Vec::new();
    let mut buffer: Option<Vec<Value>> = None;
    for word in words {
        if buffer.is_some() {
            if let Some(prefix) = word.strip_suffix(']') {
                let mut items = buffer.take().unwrap_or_default();
                if !prefix.is_empty() {
                    items.push(Value::Str(prefix.to_string()));
                }
                code.push(Value::List(ListValue::from_vec(items)));
            } else if let Some(items) = buffer.as_mut() {
                items.push(Value::Str(word.to_string()));
            }
            continue;
        }
        let lowered = word.to_lowercase();
        if word == "[]" {
            code.push(Value::List(ListValue::new()));
        } else if let Some(rest) = word.strip_prefix('[') {
            if let Some(inner) = rest.strip_suffix(']') {
                code.push(Value::List(ListValue::from_vec(vec![Value::Str(
                    inner.to_string(),
                )])));
            } else {
                let mut items = Vec::new();
                if !rest.is_empty() {
                    items.push(Value::Str(rest.to_string()));
                }
                buffer = Some(items);
            }
        } else if word.starts_with("--") {
            break;
        } else if word.starts_with(':') {
            code.push(Value::Str(lowered));
        } else if lowered == "do" || lowered == "end" {
            code.push(Value::Str(lowered));
        } else if lowered == "true" {
            code.push(Value::Bool(true));
        } else if lowered == "false" {
            code.push(Value::Bool(false));
        } else if lowered == "nil" {
            code.push(Value::Nil);
        } else if let Some(proc) = procedures.get(&lowered) {
            code.push(Value::Proc(*proc));
        } else if is_integer_literal(word) {
            code.push(Value::Int(word.parse::<i64>().unwrap_or(0)));
        } else if let Ok(x) = word.parse::<f64>() {
            code.push(Value::Float(x));
        } else {
            code.push(Value::Str(word.to_string()));
        }
    }
    if buffer.is_some() {
        Err(RuntimeError::UnclosedList)
    } else {
        Ok(code)
    }
}

/// Matches `-?[0-9]+`: only then is the word an integer literal, so `+5`
/// and `1_000` fall through to the float/string rules.
fn is_integer_literal(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
