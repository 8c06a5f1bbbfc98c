use std::fmt::Write;

use chrono::DateTime;
use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value as JsonValue;

/// Flattens a JSON value to display text. Missing values become empty.
fn text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(" "),
        JsonValue::Object(map) => map.values().map(text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

/// Backslash-escapes characters DingTalk's markdown would interpret and folds
/// newlines so a value cannot break out of the list item it is rendered in.
pub(crate) fn escape_markdown(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            '\\' | '`' | '*' | '_' | '[' | ']' | '#' | '>' | '|' => {
                out.push('\\');
                out.push(c);
            }
            '\r' => {}
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

handlebars_helper!(upper: |v: Json| text(v).to_uppercase());
handlebars_helper!(lower: |v: Json| text(v).to_lowercase());
handlebars_helper!(markdown: |v: Json| escape_markdown(&text(v)));

// Objects join their values (key order), arrays join their items.
handlebars_helper!(join: |v: Json, sep: str| match v {
    JsonValue::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(sep),
    JsonValue::Object(map) => map.values().map(text).collect::<Vec<_>>().join(sep),
    other => text(other),
});

handlebars_helper!(date: |v: Json, fmt: str| format_time(&text(v), fmt));

/// Formats an RFC 3339 timestamp with a strftime pattern. Unparsable input or
/// an invalid pattern yields empty text.
fn format_time(raw: &str, fmt: &str) -> String {
    let Ok(t) = DateTime::parse_from_rfc3339(raw) else {
        return String::new();
    };
    let mut out = String::new();
    if write!(out, "{}", t.format(fmt)).is_err() {
        out.clear();
    }
    out
}

pub(crate) fn register(registry: &mut Handlebars<'static>) {
    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("markdown", Box::new(markdown));
    registry.register_helper("join", Box::new(join));
    registry.register_helper("date", Box::new(date));
}
