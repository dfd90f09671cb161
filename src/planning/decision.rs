//! Parsing the model's step decision
//!
//! Preferred form is `{"reasoning": ..., "action": ..., "args": {...}}`.
//! Failing that, a line-oriented `key: value` / `key=value` form is accepted,
//! with bracketed lists and `tool(k=v)` call syntax. Anything else is WRITE.

use crate::extraction::sanitize_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel action that ends the loop
pub const WRITE_ACTION: &str = "WRITE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub reasoning: String,
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Decision {
    pub fn write(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: WRITE_ACTION.to_string(),
            args: Map::new(),
        }
    }

    pub fn is_write(&self) -> bool {
        let action = self.action.trim();
        action.eq_ignore_ascii_case(WRITE_ACTION)
            || action.eq_ignore_ascii_case("write_ready")
            || action.eq_ignore_ascii_case("finish")
    }
}

const REASONING_KEYS: &[&str] = &["reasoning", "thought", "thinking", "reason"];
const ACTION_KEYS: &[&str] = &["action", "tool", "tool_name", "toolname"];
const ARGS_KEYS: &[&str] = &["args", "arguments", "params", "parameters", "action_input"];

/// Parse a decision, never failing
pub fn parse_decision(text: &str) -> Decision {
    if let Some(decision) = sanitize_json(text).and_then(|v| from_json(&v)) {
        return decision;
    }
    if let Some(decision) = from_lines(text) {
        return decision;
    }
    Decision::write("decision could not be parsed")
}

fn from_json(value: &Value) -> Option<Decision> {
    let object = value.as_object()?;
    let find = |keys: &[&str]| {
        object
            .iter()
            .find(|(k, _)| keys.contains(&k.to_lowercase().as_str()))
            .map(|(_, v)| v)
    };
    let raw_action = find(ACTION_KEYS)?.as_str()?.trim();
    if raw_action.is_empty() {
        return None;
    }
    let (action, mut args) = split_call(raw_action);
    if let Some(Value::Object(given)) = find(ARGS_KEYS) {
        args.extend(given.clone());
    }
    let reasoning = find(REASONING_KEYS)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Decision {
        reasoning,
        action,
        args,
    })
}

fn from_lines(text: &str) -> Option<Decision> {
    let mut reasoning = String::new();
    let mut action: Option<(String, Map<String, Value>)> = None;
    let mut args = Map::new();

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '#', '>']).trim();
        let Some((key, value)) = split_pair(line) else {
            continue;
        };
        let key = key.to_lowercase().replace(' ', "_");
        if REASONING_KEYS.contains(&key.as_str()) {
            reasoning = value.to_string();
        } else if ACTION_KEYS.contains(&key.as_str()) {
            let name = unbracket(value);
            if !name.is_empty() {
                action = Some(split_call(name));
            }
        } else if ARGS_KEYS.contains(&key.as_str()) {
            match sanitize_json(value) {
                Some(Value::Object(given)) => args.extend(given),
                _ => args.extend(parse_pairs(unbracket(value))),
            }
        }
    }

    let (action, mut call_args) = action?;
    call_args.extend(args);
    Some(Decision {
        reasoning,
        action,
        args: call_args,
    })
}

/// Split at the first `:` or `=`, whichever comes first
fn split_pair(line: &str) -> Option<(&str, &str)> {
    let at = line.find([':', '='])?;
    let key = line[..at].trim().trim_matches(['"', '\'', '*']);
    let value = line[at + 1..].trim().trim_matches(['"', '\'']);
    (!key.is_empty()).then_some((key, value))
}

/// Strip surrounding brackets and take the first list element
fn unbracket(value: &str) -> &str {
    let inner = value
        .trim()
        .trim_start_matches(['[', '{'])
        .trim_end_matches([']', '}'])
        .trim();
    if value.trim_start().starts_with('[') {
        inner.split(',').next().unwrap_or_default().trim().trim_matches(['"', '\''])
    } else {
        inner
    }
}

/// `getRelevantEvents(limit=5)` → name plus args
fn split_call(raw: &str) -> (String, Map<String, Value>) {
    match (raw.find('('), raw.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            let name = raw[..open].trim().to_string();
            (name, parse_pairs(&raw[open + 1..close]))
        }
        _ => (raw.trim().trim_matches(['"', '\'', '`']).to_string(), Map::new()),
    }
}

fn parse_pairs(text: &str) -> Map<String, Value> {
    text.split(',')
        .filter_map(split_pair)
        .map(|(k, v)| (k.to_string(), scalar(v)))
        .collect()
}

fn scalar(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "none" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}
