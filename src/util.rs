use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Append `value` as a JSON string literal.
///
/// Non-ASCII text is written verbatim; only quotes, backslashes and control
/// characters are escaped.
#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

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
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

/// Shorten `text` to at most `max_bytes`, respecting char boundaries.
#[must_use]
pub(crate) fn truncate_for_log(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
