//! PII redaction for webhook payloads.
//!
//! Emails, phone numbers, card numbers, and national-id patterns are
//! replaced with fixed tokens before the payload is signed, so nothing
//! sensitive leaves the process and retried deliveries stay identical.

use regex::Regex;

pub struct Redactor {
    patterns: Vec<(Regex, &'static str)>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    pub fn new() -> Self {
        // Order matters: cards would otherwise partially match the
        // phone pattern.
        let patterns = vec![
            (
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                    .expect("email regex"),
                "[email]",
            ),
            (
                Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{3,4}\b").expect("card regex"),
                "[card]",
            ),
            (
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("national id regex"),
                "[national_id]",
            ),
            (
                Regex::new(r"\+?\d{1,3}[ -.]?\(?\d{2,4}\)?[ -.]?\d{3,4}[ -.]?\d{3,4}\b")
                    .expect("phone regex"),
                "[phone]",
            ),
        ];
        Self { patterns }
    }

    /// Redact a plain string.
    pub fn redact_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (pattern, token) in &self.patterns {
            out = pattern.replace_all(&out, *token).into_owned();
        }
        out
    }

    /// Redact every string inside a JSON value, recursively.
    pub fn redact_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.redact_str(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.redact_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_tokenized() {
        let r = Redactor::new();
        assert_eq!(
            r.redact_str("reach me at jane.doe+spam@example.co.uk please"),
            "reach me at [email] please"
        );
    }

    #[test]
    fn cards_are_tokenized_before_phones() {
        let r = Redactor::new();
        assert_eq!(r.redact_str("card 4111 1111 1111 1111 ok"), "card [card] ok");
        assert_eq!(r.redact_str("card 4111-1111-1111-1111 ok"), "card [card] ok");
    }

    #[test]
    fn phones_are_tokenized() {
        let r = Redactor::new();
        assert_eq!(r.redact_str("call +1 415 555 0134 now"), "call [phone] now");
        assert_eq!(r.redact_str("call 415-555-0134 now"), "call [phone] now");
    }

    #[test]
    fn national_ids_are_tokenized() {
        let r = Redactor::new();
        assert_eq!(r.redact_str("ssn 078-05-1120 on file"), "ssn [national_id] on file");
    }

    #[test]
    fn ordinary_text_untouched() {
        let r = Redactor::new();
        let text = "book me tomorrow at 3pm for 2 people";
        assert_eq!(r.redact_str(text), text);
    }

    #[test]
    fn json_redaction_is_recursive() {
        let r = Redactor::new();
        let payload = serde_json::json!({
            "text": "email bob@example.com",
            "nested": { "items": ["my ssn is 078-05-1120", 42] }
        });
        let redacted = r.redact_json(&payload);
        assert_eq!(redacted["text"], "email [email]");
        assert_eq!(redacted["nested"]["items"][0], "my ssn is [national_id]");
        assert_eq!(redacted["nested"]["items"][1], 42);
    }
}
