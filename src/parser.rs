use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Parameters recovered from an A1111-style infotext.
///
/// Format: `{prompt}\nNegative prompt: {neg}\nSteps: N, Sampler: X, ...`
/// Every `Key: Value` pair from the parameter block lands in `params`
/// verbatim; typed accessors cover the keys the regeneration flow needs.
#[derive(Debug, Clone, Default)]
pub struct InfotextParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub params: HashMap<String, String>,
}

impl InfotextParams {
    /// Seed recorded for the image, `-1` when absent or unparsable.
    pub fn seed(&self) -> i64 {
        self.int_param("Seed").unwrap_or(-1)
    }

    /// Variation seed recorded for the image, `-1` when absent.
    pub fn variation_seed(&self) -> i64 {
        self.int_param("Variation seed").unwrap_or(-1)
    }

    fn int_param(&self, key: &str) -> Option<i64> {
        self.params
            .get(key)
            .and_then(|value| value.trim().parse::<i64>().ok())
    }
}

/// Parses free-form `key: value` override lines into a typed settings map.
///
/// One pair per line. Values are coerced to bool or number where they parse
/// as one, otherwise kept as strings. Malformed lines (no colon, empty key
/// or value) are dropped without error; the override box is a lenient
/// surface and a half-typed line must not block generation.
pub fn parse_override_settings(text: &str) -> Map<String, Value> {
    let mut overrides = Map::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        overrides.insert(key.to_string(), coerce_override_value(value));
    }

    overrides
}

fn coerce_override_value(raw: &str) -> Value {
    match raw {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }

    Value::String(raw.to_string())
}

/// Parses a raw A1111-style infotext into prompt sections and parameters.
///
/// Handles edge cases:
/// - Colons in prompt weights like `(masterpiece:1.2)`
/// - Commas within parameter values like `Lora hashes: "a:1, b:2"`
/// - Missing negative prompt section
/// - Infotext with only a parameter block (no prompt text)
pub fn parse_infotext(raw: &str) -> InfotextParams {
    let mut parsed = InfotextParams::default();

    let raw = raw.trim();
    if raw.is_empty() {
        return parsed;
    }

    let (prompt_section, neg_and_rest) = if let Some(neg_idx) = raw.find("Negative prompt:") {
        let prompt = raw[..neg_idx].trim().to_string();
        let rest = raw[neg_idx + "Negative prompt:".len()..].trim();
        (prompt, Some(rest.to_string()))
    } else {
        (raw.to_string(), None)
    };

    let param_block = if let Some(ref neg_rest) = neg_and_rest {
        parsed.prompt = prompt_section;
        if let Some(steps_idx) = neg_rest.find("\nSteps:") {
            parsed.negative_prompt = neg_rest[..steps_idx].trim().to_string();
            Some(neg_rest[steps_idx + 1..].trim().to_string())
        } else if let Some(steps_idx) = neg_rest.find("Steps:") {
            parsed.negative_prompt = neg_rest[..steps_idx].trim().to_string();
            Some(neg_rest[steps_idx..].trim().to_string())
        } else {
            parsed.negative_prompt = neg_rest.to_string();
            None
        }
    } else if let Some(steps_idx) = prompt_section.find("\nSteps:") {
        parsed.prompt = prompt_section[..steps_idx].trim().to_string();
        Some(prompt_section[steps_idx + 1..].trim().to_string())
    } else if prompt_section.starts_with("Steps:") {
        Some(prompt_section)
    } else {
        parsed.prompt = prompt_section;
        None
    };

    if let Some(block) = param_block {
        for pair in split_parameter_pairs(&block) {
            if let Some(colon_pos) = pair.find(':') {
                let key = pair[..colon_pos].trim();
                let value = pair[colon_pos + 1..].trim();
                parsed.params.insert(key.to_string(), value.to_string());
            }
        }
    }

    parsed
}

/// Splits the parameter block on commas that look like true `Key: Value`
/// boundaries.
///
/// A split happens only when the comma is followed by a key that starts with
/// an uppercase ASCII letter, has a valid key body, and ends with `:`. This
/// keeps values such as `Lora hashes: "a:111, b:222"` intact.
fn split_parameter_pairs(block: &str) -> Vec<String> {
    let mut pairs = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;

    for (idx, ch) in block.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes && is_key_boundary_after_comma(block, idx + 1) => {
                let segment = block[start..idx].trim();
                if !segment.is_empty() {
                    pairs.push(segment.to_string());
                }
                start = idx + 1;
            }
            _ => {}
        }
    }

    let tail = block[start..].trim();
    if !tail.is_empty() {
        pairs.push(tail.to_string());
    }

    pairs
}

fn is_key_boundary_after_comma(block: &str, from_idx: usize) -> bool {
    let bytes = block.as_bytes();
    let mut idx = from_idx;

    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    if idx >= bytes.len() || !bytes[idx].is_ascii_uppercase() {
        return false;
    }

    let key_start = idx;
    while idx < bytes.len() {
        let b = bytes[idx];
        if b == b':' {
            return idx > key_start;
        }
        if b == b',' || b == b'\n' || b == b'\r' {
            return false;
        }

        let is_valid_key_char = b.is_ascii_alphanumeric()
            || matches!(b, b' ' | b'_' | b'-' | b'/' | b'.' | b'(' | b')');
        if !is_valid_key_char {
            return false;
        }
        idx += 1;
    }

    false
}
