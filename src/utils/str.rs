//! Utilities for handling strings.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};


//------------ escape_entities -----------------------------------------------

/// Escapes the characters that are significant in HTML.
///
/// This covers `<`, `>`, `&`, and both kinds of quotes, so the result can be
/// used in text as well as in attribute values.
pub fn escape_entities(text: &str) -> String {
    let mut res = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => res.push_str("&lt;"),
            '>' => res.push_str("&gt;"),
            '&' => res.push_str("&amp;"),
            '\'' => res.push_str("&apos;"),
            '"' => res.push_str("&quot;"),
            _ => res.push(ch)
        }
    }
    res
}


//------------ encode_href ---------------------------------------------------

/// The characters percent-encoded in a relative link target.
///
/// Besides controls and non-ASCII characters this covers everything that
/// can’t appear in a path or would end it.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>')
    .add(b'?').add(b'[').add(b'\\').add(b']').add(b'^').add(b'`')
    .add(b'{').add(b'|').add(b'}');

/// Percent-encodes a string for use as a path in a link.
///
/// Slashes are left alone.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF).to_string()
}


//============ Tests =========================================================
