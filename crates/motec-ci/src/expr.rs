//! `${{ ... }}` expression substitution.
//!
//! Only property lookups are supported. Unknown names evaluate to the empty
//! string, matching the hosted runner.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("expression pattern is valid")
    })
}

/// Replace every `${{ name }}` in `input` with its value from `ctx`.
pub fn substitute(input: &str, ctx: &HashMap<String, String>) -> String {
    expression_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            ctx.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
