//! `{{key}}` placeholder substitution for notification texts and step
//! descriptions.

use crate::FormValues;
use crate::domain::request::FieldValue;
use crate::domain::fields::EntryType;

/// Replace every `{{key}}` placeholder in `text` with the matching form
/// value rendered as display text. Unknown keys render as the empty
/// string; unterminated placeholders are kept verbatim.
pub fn render(text: &str, values: &FormValues) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = values.get(key) {
                    out.push_str(&display(value));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => match FieldValue::from_json(EntryType::Text, other) {
            Some(v) => v.to_display_string(),
            None => other.to_string(),
        },
    }
}
