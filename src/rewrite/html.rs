//! Streaming document transformation.
//!
//! The upstream document is consumed as a stream of element/attribute events
//! and re-emitted incrementally; the whole document is never buffered. A
//! static registry maps (element, attribute) pairs to rewrite actions, and a
//! single dispatch routine interprets it, so covering a new attribute is a
//! data change rather than new control flow.

use bytes::Bytes;
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, text, HtmlRewriter, Settings};
use lol_html::errors::RewritingError;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;
use url::form_urlencoded;

use super::{css, RewriteContext};
use crate::runtime;

#[derive(Debug, Clone, Copy)]
enum AttrAction {
    /// Resolve against the base URL and encode through the codec.
    Url,
    /// Comma-separated srcset list; each entry's URL token is rewritten and
    /// its density/width descriptor kept.
    SrcsetList,
    /// CSS text; passed through the CSS URL rewriter.
    CssText,
}

struct AttrRule {
    name: &'static str,
    action: AttrAction,
}

struct ElementRule {
    selector: &'static str,
    attrs: &'static [AttrRule],
}

const fn url_attr(name: &'static str) -> AttrRule {
    AttrRule { name, action: AttrAction::Url }
}

const fn srcset_attr(name: &'static str) -> AttrRule {
    AttrRule { name, action: AttrAction::SrcsetList }
}

/// Inline styles are rewritten on every element the registry touches.
const STYLE_ATTR: AttrRule = AttrRule { name: "style", action: AttrAction::CssText };

static ELEMENT_RULES: &[ElementRule] = &[
    ElementRule { selector: "a[href]", attrs: &[url_attr("href")] },
    ElementRule { selector: "form[action]", attrs: &[url_attr("action")] },
    ElementRule {
        selector: "img",
        attrs: &[
            url_attr("src"),
            srcset_attr("srcset"),
            url_attr("data-src"),
            srcset_attr("data-srcset"),
            url_attr("data-background"),
            url_attr("data-image"),
        ],
    },
    ElementRule { selector: "source", attrs: &[url_attr("src"), srcset_attr("srcset")] },
    ElementRule { selector: "video", attrs: &[url_attr("src"), url_attr("poster")] },
    ElementRule { selector: "audio", attrs: &[url_attr("src")] },
    ElementRule { selector: "script[src]", attrs: &[url_attr("src")] },
    ElementRule { selector: "link[rel~='stylesheet']", attrs: &[url_attr("href")] },
    ElementRule { selector: "link[rel~='preload']", attrs: &[url_attr("href")] },
    ElementRule { selector: "link[rel~='prefetch']", attrs: &[url_attr("href")] },
    ElementRule { selector: "iframe[src]", attrs: &[url_attr("src")] },
    // Inline styles appear on arbitrary elements; this rule catches the ones
    // no tag rule above matches. A double match is harmless: an
    // already-proxied url() reference encodes to itself.
    ElementRule { selector: "[style]", attrs: &[] },
];

/// Apply the registry rules plus integrity/CORS normalization to one
/// element. A failing rule leaves that attribute unmodified; the transform
/// continues.
fn apply_element_rules(el: &mut Element, attrs: &[AttrRule], ctx: &RewriteContext) {
    for rule in attrs.iter().chain(std::iter::once(&STYLE_ATTR)) {
        let Some(value) = el.get_attribute(rule.name) else {
            continue;
        };
        let rewritten = match rule.action {
            AttrAction::Url => ctx.rewrite_url(&value),
            AttrAction::SrcsetList => rewrite_srcset(&value, ctx),
            AttrAction::CssText => {
                let out = css::rewrite_css_urls(&value, ctx);
                (out != value).then_some(out)
            }
        };
        if let Some(rewritten) = rewritten {
            if let Err(e) = el.set_attribute(rule.name, &rewritten) {
                warn!(attribute = rule.name, error = %e, "attribute rewrite skipped");
            }
        }
    }
    normalize_embed_attrs(el);
}

/// Proxied bytes no longer match subresource-integrity hashes, and
/// restrictive crossorigin modes break under the proxy origin; images and
/// media need anonymous CORS for canvas/WebGL consumption.
fn normalize_embed_attrs(el: &mut Element) {
    match el.tag_name().to_ascii_lowercase().as_str() {
        "script" | "link" => {
            el.remove_attribute("integrity");
            el.remove_attribute("crossorigin");
        }
        "img" | "video" | "audio" => {
            if !el.has_attribute("crossorigin") {
                if let Err(e) = el.set_attribute("crossorigin", "anonymous") {
                    warn!(error = %e, "crossorigin normalization skipped");
                }
            }
        }
        _ => {}
    }
}

fn rewrite_srcset(value: &str, ctx: &RewriteContext) -> Option<String> {
    let mut changed = false;
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let mut parts = item.splitn(2, char::is_whitespace);
            let url = parts.next().unwrap_or("");
            let descriptor = parts.next().map(str::trim).unwrap_or("");
            match ctx.rewrite_url(url) {
                Some(rewritten) if descriptor.is_empty() => {
                    changed = true;
                    rewritten
                }
                Some(rewritten) => {
                    changed = true;
                    format!("{} {}", rewritten, descriptor)
                }
                None => item.to_string(),
            }
        })
        .collect();
    changed.then(|| items.join(", "))
}

/// Inbound query parameters serialized for the injected config blob.
fn inject_params_json(ctx: &RewriteContext) -> String {
    let mut map = serde_json::Map::new();
    for (key, value) in form_urlencoded::parse(ctx.inbound_query.as_bytes()) {
        map.insert(key.into_owned(), json!(value.into_owned()));
    }
    // "</" must not appear inside an inline script.
    serde_json::Value::Object(map).to_string().replace("</", "<\\/")
}

/// The injection bundle placed at the start of the head, in document order:
/// diagnostics bootstrap, base override, config blob, runtime patch. The
/// patch must run before the first original page script.
fn head_injection(ctx: &RewriteContext) -> String {
    format!(
        "<script>{diagnostics}</script>\
         <base href=\"{base}\">\
         <script>\n\
         window.__INJECT_PARAMS__ = {params};\n\
         window.__PROXY_ORIGIN__ = {origin};\n\
         window.__PROXY_TARGET__ = {target};\n\
         window.__PROXY_PATHNAME__ = {path};\n\
         </script>\
         <script>{patch}</script>",
        diagnostics = runtime::DIAGNOSTICS_BOOTSTRAP,
        base = ctx.base_url,
        params = inject_params_json(ctx),
        origin = json!(ctx.identity.origin),
        target = json!(ctx.base_url.as_str()),
        path = json!(ctx.identity.path),
        patch = runtime::RUNTIME_PATCH,
    )
}

/// Appended at the end of the head: debug helper, then the deferred overlay
/// script tag.
fn head_tail(ctx: &RewriteContext) -> String {
    format!(
        "<script>{debug}</script><script defer src=\"{overlay}\"></script>",
        debug = runtime::DEBUG_HELPER,
        overlay = ctx.overlay_url(),
    )
}

/// Drive the rewriter over a chunk source, pushing output through `sink`.
fn run_rewriter(
    ctx: &RewriteContext,
    mut next_chunk: impl FnMut() -> Option<Bytes>,
    sink: impl FnMut(&[u8]),
) -> Result<(), RewritingError> {
    let injection = head_injection(ctx);
    let tail = head_tail(ctx);
    let mut injected = false;
    let mut style_buf = String::new();

    let mut handlers = vec![
        // Security-policy meta directives never reach the client.
        element!("meta[http-equiv]", |el| {
            let directive = el
                .get_attribute("http-equiv")
                .unwrap_or_default()
                .to_ascii_lowercase();
            if directive == "content-security-policy"
                || directive == "content-security-policy-report-only"
            {
                el.remove();
            }
            Ok(())
        }),
        // The origin's base would defeat relative-URL rewriting; the proxy
        // installs its own.
        element!("base", |el| {
            el.remove();
            Ok(())
        }),
        element!("head", |el| {
            if !injected {
                injected = true;
                el.prepend(&injection, ContentType::Html);
                el.append(&tail, ContentType::Html);
            }
            Ok(())
        }),
        // url() references can span text chunks; accumulate until the node
        // ends before rewriting.
        text!("style", |chunk| {
            style_buf.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let rewritten = css::rewrite_css_urls(&style_buf, ctx);
                chunk.replace(&rewritten, ContentType::Html);
                style_buf.clear();
            } else {
                chunk.remove();
            }
            Ok(())
        }),
    ];

    for rule in ELEMENT_RULES {
        handlers.push(element!(rule.selector, move |el| {
            apply_element_rules(el, rule.attrs, ctx);
            Ok(())
        }));
    }

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::default()
        },
        sink,
    );

    while let Some(chunk) = next_chunk() {
        rewriter.write(&chunk)?;
    }
    rewriter.end()
}

/// Pump upstream body chunks through the rewriter, emitting transformed
/// chunks as they become available. Runs on a blocking thread; both ends are
/// bounded channels, so output flushes to the client before upstream
/// finishes and a slow client backpressures the whole pipeline instead of
/// buffering the document.
pub fn transform_channel(
    ctx: &RewriteContext,
    mut input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
) -> Result<(), RewritingError> {
    run_rewriter(
        ctx,
        move || input.blocking_recv(),
        move |chunk: &[u8]| {
            // A closed receiver means the client went away; the rewriter
            // drains without anyone reading.
            let _ = output.blocking_send(Bytes::copy_from_slice(chunk));
        },
    )
}
