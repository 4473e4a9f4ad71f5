//! Finding and parsing directives.

use std::ops::Range;
use std::sync::OnceLock;
use regex::Regex;


//------------ Directive -----------------------------------------------------

/// A single directive found in a document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directive {
    /// The command word right after the opening `<!--#`.
    command: String,

    /// The parameters in order of their first appearance.
    ///
    /// Keys are unique. A key given without a value maps to `None`.
    params: Vec<(String, Option<String>)>,

    /// The complete text of the directive.
    raw: String,
}

impl Directive {
    /// Creates a directive from its command and raw parameter text.
    pub fn new(command: &str, params: &str, raw: &str) -> Self {
        Directive {
            command: command.into(),
            params: parse_params(params),
            raw: raw.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the raw text of the directive as found in the document.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns whether the parameter `key` is present at all.
    pub fn has_param(&self, key: &str) -> bool {
        self.params.iter().any(|item| item.0 == key)
    }

    /// Returns the value of parameter `key`.
    ///
    /// Returns `None` both if the parameter is missing and if it was given
    /// without a value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|item| item.0 == key).and_then(|item| {
            item.1.as_deref()
        })
    }

    /// Returns an iterator over the parameters.
    pub fn params(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.params.iter().map(|(key, value)| {
            (key.as_str(), value.as_deref())
        })
    }
}


//------------ scan ----------------------------------------------------------

/// Returns the regular expression matching a directive.
///
/// The first group is the command, the second the parameter text. The
/// command may contain dashes but never the `-->` closing the comment.
fn directive_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<!--#([^\s>-]+(?:-+[^\s>-]+)*)\s+(.*?)-->").expect(
            "broken directive regex"
        )
    })
}

/// Returns the regular expression matching a single parameter.
fn param_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"([^\s="]+)(?:="([^"]*)")?"#).expect(
            "broken parameter regex"
        )
    })
}

/// Finds all directives in a text.
///
/// Returns the directives together with the range of the text they cover
/// in the order they appear.
pub fn scan(text: &str) -> Vec<(Range<usize>, Directive)> {
    directive_regex().captures_iter(text).filter_map(|captures| {
        let all = captures.get(0)?;
        let command = captures.get(1)?.as_str();
        let params = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        Some((all.range(), Directive::new(command, params, all.as_str())))
    }).collect()
}

/// Parses the parameter text of a directive.
///
/// Parameters are separated by white space and are either a bare key or
/// a key followed by `="value"`. If a key appears more than once, it keeps
/// the position of its first appearance and the value of its last.
///
/// If anything in the text isn’t a parameter, the whole text is considered
/// broken and an empty list is returned.
fn parse_params(text: &str) -> Vec<(String, Option<String>)> {
    let mut res: Vec<(String, Option<String>)> = Vec::new();
    let mut end = 0;
    for captures in param_regex().captures_iter(text) {
        let all = match captures.get(0) {
            Some(all) => all,
            None => continue,
        };
        let gap = &text[end..all.start()];
        if (end > 0 && gap.is_empty()) || !gap.trim().is_empty() {
            return Vec::new()
        }
        end = all.end();
        let key = match captures.get(1) {
            Some(key) => key.as_str(),
            None => return Vec::new(),
        };
        let value = captures.get(2).map(|value| value.as_str().to_string());
        match res.iter_mut().find(|item| item.0 == key) {
            Some(item) => item.1 = value,
            None => res.push((key.into(), value)),
        }
    }
    if !text[end..].trim().is_empty() {
        return Vec::new()
    }
    res
}


//============ Tests =========================================================
