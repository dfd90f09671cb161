//! Turn a raw model response into strict JSON
//!
//! Models wrap JSON in code fences, add prose around it, leave `...`
//! placeholders, `// comments`, bare `undefined`/`NaN`, and trailing commas.
//! Each of these is removed outside string literals before parsing.

use serde_json::Value;

/// Extract a JSON object from model response text.
///
/// Tries, in order: direct parse, the first fenced block, the outermost
/// `{...}` span. Each candidate is parsed as-is and then after noise removal.
pub fn sanitize_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    let unfenced = fenced_block(trimmed).unwrap_or(trimmed);
    if let Some(v) = parse_object(unfenced) {
        return Some(v);
    }

    let span = outermost_braces(unfenced)?;
    parse_object(span)
}

fn parse_object(candidate: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return v.is_object().then_some(v);
    }
    let cleaned = strip_trailing_commas(&strip_noise(candidate));
    serde_json::from_str::<Value>(cleaned.trim())
        .ok()
        .filter(Value::is_object)
}

/// Contents of the first ```json or ``` fenced block
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an info string such as "json" up to the end of the line
    let body_start = match after.find('\n') {
        Some(i) if after[..i].trim().chars().all(char::is_alphanumeric) => i + 1,
        _ => 0,
    };
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim())
}

fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Remove comments and placeholder tokens appearing outside string literals
pub fn strip_noise(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '.' if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') => {
                i += 3;
            }
            '…' => {
                i += 1;
            }
            _ if is_word_char(c) && (i == 0 || !is_word_char(chars[i - 1])) => {
                let word_end = (i..chars.len())
                    .find(|&j| !is_word_char(chars[j]))
                    .unwrap_or(chars.len());
                let word: String = chars[i..word_end].iter().collect();
                if word == "undefined" || word == "NaN" {
                    out.push_str("null");
                } else {
                    out.push_str(&word);
                }
                i = word_end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Drop commas directly followed (modulo whitespace) by `}` or `]`
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']') | None) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
