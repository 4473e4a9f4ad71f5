//! Content types for files.

use std::path::Path;


/// The content type used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content types that deviate from what `mime_guess` would tell us.
const OVERRIDES: &[(&str, &str)] = &[
    ("shtml", "text/html"),
    ("md", "text/markdown"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
];

/// Returns the content type for a file path.
///
/// The type is determined from the extension of the path alone. Textual
/// types receive an explicit UTF-8 charset parameter.
pub fn mime_type_for(path: &Path) -> String {
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE.into()
    };
    let base = match OVERRIDES.iter().find(|item| item.0 == ext) {
        Some((_, content_type)) => String::from(*content_type),
        None => {
            mime_guess::from_ext(&ext).first_raw().unwrap_or(
                DEFAULT_CONTENT_TYPE
            ).into()
        }
    };
    if base.starts_with("text/") {
        format!("{}; charset=UTF-8", base)
    }
    else {
        base
    }
}


//============ Tests =========================================================
