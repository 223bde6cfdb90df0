use std::fmt::Write;

/// JSON string literal restricted to printable ASCII, suitable for an HTTP
/// header value. Non-ASCII characters become `\uXXXX` escapes (surrogate
/// pairs above the BMP), so `Café 🎬` is sent as `"Caf\u00e9 \ud83c\udfac"`.
pub fn ascii_json_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(ch),
            _ => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_quoted() {
        assert_eq!(ascii_json_string("Crazy Stunt!"), "\"Crazy Stunt!\"");
        assert_eq!(ascii_json_string(""), "\"\"");
    }

    #[test]
    fn non_ascii_is_escaped() {
        assert_eq!(
            ascii_json_string("Café 🎬"),
            "\"Caf\\u00e9 \\ud83c\\udfac\""
        );
    }

    #[test]
    fn control_and_quote_characters_are_escaped() {
        let encoded = ascii_json_string("say \"hi\"\nnow\\\u{1}");
        assert_eq!(encoded, "\"say \\\"hi\\\"\\nnow\\\\\\u0001\"");
        assert!(encoded.bytes().all(|b| (0x20..0x7f).contains(&b)));
    }

    #[test]
    fn output_round_trips_through_json() {
        let original = "Ünïcode — «quotes» \"and\" emoji 🚀";
        let decoded: String = serde_json::from_str(&ascii_json_string(original)).unwrap();
        assert_eq!(decoded, original);
    }
}
