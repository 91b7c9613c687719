//! Rewriting of `url(...)` references in CSS text.
//!
//! One function, three call sites: whole stylesheet bodies, inline `style`
//! attributes, and `<style>` element text. Everything outside a `url()`
//! reference is preserved byte for byte, and the original quoting style of
//! each reference is kept.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::RewriteContext;

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    // The captured reference excludes quotes and parens; the closing quote
    // is matched loosely because backreferences are unavailable.
    Regex::new(r#"url\(\s*(['"]?)([^'")]+)['"]?\s*\)"#).unwrap()
});

/// Rewrite every `url(...)` reference in `text` through the URL codec,
/// resolving relative references against the context base URL.
pub fn rewrite_css_urls(text: &str, ctx: &RewriteContext) -> String {
    CSS_URL
        .replace_all(text, |caps: &Captures| {
            let quote = &caps[1];
            let reference = caps[2].trim();
            match ctx.rewrite_url(reference) {
                Some(rewritten) => format!("url({quote}{rewritten}{quote})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
