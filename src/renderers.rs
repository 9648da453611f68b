//! Elements that turn their `value` attribute into markup.
//!
//! By the time a renderer runs, `value` holds a literal (field paths
//! were resolved by the hosting element). Rendering replaces what a
//! previous rendering produced, so running it again is harmless.

use std::fmt::Write;
use anyhow::{bail, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use hn_dom::{HtmlDom, NodeId};
use hn_markdown::markdown_to_dom;
use hn_util::warn;
use qrcode::{render::svg, QrCode};

use crate::config::HnConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererKind {
    Link,
    Time,
    Image,
    Markdown,
    Iframe,
    Qr,
    Form,
    Refresh,
}

pub struct RenderContext<'t> {
    pub config: &'t HnConfig,
}

type RenderFn = fn(&mut HtmlDom, NodeId, &RenderContext) -> Result<()>;

const RENDERERS: &[(RendererKind, &str, RenderFn)] = &[
    (RendererKind::Link, "hn-a", render_link),
    (RendererKind::Time, "hn-time", render_time),
    (RendererKind::Image, "hn-img", render_image),
    (RendererKind::Markdown, "hn-markdown", render_markdown),
    (RendererKind::Iframe, "hn-iframe", render_iframe),
    (RendererKind::Qr, "hn-qr", render_qr),
    (RendererKind::Form, "hn-form", render_form),
    (RendererKind::Refresh, "hn-refresh", render_refresh),
];

impl RendererKind {
    pub fn from_tag_name(name: &str) -> Option<RendererKind> {
        RENDERERS.iter().find(|(_, n, _)| *n == name).map(|(k, _, _)| *k)
    }

    pub fn tag_name(self) -> &'static str {
        RENDERERS.iter().find(|(k, _, _)| *k == self).map(|(_, n, _)| *n)
            .expect("all kinds are in the table")
    }

    /// Whether the renderer shows a `value` (as opposed to wrapping
    /// interactive content).
    pub fn takes_value(self) -> bool {
        !matches!(self, RendererKind::Form | RendererKind::Refresh)
    }
}

/// (Re-)render the renderer element `node` of kind `kind`.
pub fn render(kind: RendererKind, dom: &mut HtmlDom, node: NodeId, ctx: &RenderContext)
              -> Result<()> {
    let f = RENDERERS.iter().find(|(k, _, _)| *k == kind).map(|(_, _, f)| *f)
        .expect("all kinds are in the table");
    f(dom, node, ctx)
}

/// The non-empty `value` of `node`; warns if there is none.
fn value(dom: &HtmlDom, node: NodeId) -> Option<String> {
    match dom.attribute(node, "value") {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            warn!("no value provided for {}", dom.tag_name(node).unwrap_or("?"));
            None
        }
    }
}

fn render_link(dom: &mut HtmlDom, node: NodeId, ctx: &RenderContext) -> Result<()> {
    let value = match value(dom, node) {
        Some(v) => v,
        None => return Ok(())
    };
    let href = ctx.config.viewer_link(&value);
    if let Some(a) = dom.find_elements(node, |e| e.name == "a").first().copied() {
        dom.set_attribute(a, "href", href)?;
    } else {
        let a = dom.new_element("a", [("href", href)]);
        dom.move_children(node, a)?;
        dom.append_child(node, a)?;
    }
    Ok(())
}

/// Epoch seconds, JS `Number` style: fractions are cut off.
fn parse_epoch(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        let f = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
        Some(f.trunc() as i64)
    })
}

fn render_time(dom: &mut HtmlDom, node: NodeId, ctx: &RenderContext) -> Result<()> {
    let value = match value(dom, node) {
        Some(v) => v,
        None => return Ok(())
    };
    let dt = match parse_epoch(&value).and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
        Some(dt) => dt,
        None => {
            warn!("invalid value {value:?} for hn-time, expecting a unix timestamp");
            return Ok(())
        }
    };
    let mut formatted = String::new();
    if write!(formatted, "{}", dt.format(&ctx.config.time_format)).is_err() {
        bail!("invalid time format {:?}", ctx.config.time_format)
    }
    let time = dom.new_element(
        "time", [("datetime", dt.to_rfc3339_opts(SecondsFormat::Millis, true))]);
    let text = dom.new_text(formatted);
    dom.append_child(time, text)?;
    dom.replace_children(node, [time])
}

fn render_image(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    if let Some(value) = value(dom, node) {
        let img = dom.new_element("img", [("src", value)]);
        dom.replace_children(node, [img])?;
    }
    Ok(())
}

/// Characters that may precede markdown text without being part of
/// it; one of them is dropped.
const INVISIBLE_PREFIXES: &[char] = &[
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}', '\u{FEFF}'
];

fn render_markdown(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    if let Some(value) = value(dom, node) {
        let src = value.strip_prefix(INVISIBLE_PREFIXES).unwrap_or(&value);
        let div = markdown_to_dom(dom, src)?;
        dom.replace_children(node, [div])?;
    }
    Ok(())
}

fn render_iframe(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    if let Some(value) = value(dom, node) {
        let src = format!("data:text/html;base64,{}", base64::encode(value));
        let iframe = dom.new_element("iframe", [("src", src)]);
        dom.replace_children(node, [iframe])?;
    }
    Ok(())
}

pub fn qr_svg(value: &str) -> Result<String> {
    Ok(QrCode::new(value.as_bytes())?
       .render::<svg::Color>()
       .min_dimensions(256, 256)
       .dark_color(svg::Color("#000000"))
       .light_color(svg::Color("#ffffff"))
       .build())
}

fn render_qr(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    if let Some(value) = value(dom, node) {
        let svg = qr_svg(&value)?;
        let src = format!("data:image/svg+xml;base64,{}", base64::encode(svg));
        let img = dom.new_element("img", [("src", src), ("alt", value)]);
        dom.replace_children(node, [img])?;
    }
    Ok(())
}

/// Wrap the children of `node` into a `wrapper` element unless that
/// was done already.
fn wrap_children(dom: &mut HtmlDom, node: NodeId, wrapper: NodeId) -> Result<NodeId> {
    let elements = dom.child_elements(node);
    if let [existing] = *elements.as_slice() {
        if dom.tag_name(existing) == dom.tag_name(wrapper)
            && dom.children(node).len() == 1
        {
            dom.remove(wrapper);
            return Ok(existing)
        }
    }
    dom.move_children(node, wrapper)?;
    dom.append_child(node, wrapper)?;
    Ok(wrapper)
}

fn render_form(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    let form = dom.new_empty_element("form");
    wrap_children(dom, node, form)?;
    Ok(())
}

fn render_refresh(dom: &mut HtmlDom, node: NodeId, _ctx: &RenderContext) -> Result<()> {
    let button = dom.new_element("button", [("type", "button")]);
    let button = wrap_children(dom, node, button)?;
    if dom.children(button).is_empty() {
        dom.set_text(button, "Refresh")?;
    }
    Ok(())
}
