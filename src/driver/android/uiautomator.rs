//! `uiautomator dump` XML to [`UiTreeSnapshot`]

use crate::driver::ui_tree::{UiNode, UiTreeSnapshot};
use crate::error::{LocateError, Result};
use crate::geometry::Resolution;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn numeric_entity_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#(?:x([0-9A-Fa-f]+)|(\d+));").ok())
        .as_ref()
}

/// Decode common HTML entities in a string
/// Handles: &amp; &lt; &gt; &quot; &apos; &#NNN; (decimal) &#xHHH; (hex)
fn decode_html_entities(s: &str) -> String {
    let mut result = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");

    if let Some(re) = numeric_entity_re() {
        result = re
            .replace_all(&result, |caps: &Captures| {
                let code = match (caps.get(1), caps.get(2)) {
                    (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                    (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
                    _ => None,
                };
                code.and_then(char::from_u32)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string();
    }

    // Last, so "&amp;lt;" stays "&lt;"
    result.replace("&amp;", "&")
}

/// Pixel bounds as written by uiautomator: "[left,top][right,bottom]"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Bounds {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl Bounds {
    fn from_string(s: &str) -> Option<Self> {
        let (lt, rb) = s.split_once("][")?;
        let parse = |pair: &str| -> Option<(i32, i32)> {
            let (a, b) = pair.split_once(',')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        };
        let (left, top) = parse(lt.trim_start_matches('['))?;
        let (right, bottom) = parse(rb.trim_end_matches(']'))?;
        Some(Bounds {
            left,
            top,
            right,
            bottom,
        })
    }

    fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

fn node_from_element(e: &BytesStart, screen: Resolution) -> UiNode {
    let mut node = UiNode::new("", "");
    let mut resource_id = String::new();
    let mut bounds = Bounds::default();
    let mut visible_to_user = true;

    for attr in e.attributes().filter_map(|a| a.ok()) {
        let key = String::from_utf8_lossy(attr.key.as_ref());
        let value = String::from_utf8_lossy(&attr.value);
        let flag = value == "true";

        match key.as_ref() {
            "class" => node.node_type = value.to_string(),
            "text" => node.text = decode_html_entities(&value),
            "resource-id" => resource_id = value.to_string(),
            "content-desc" => node.desc = decode_html_entities(&value),
            "package" => node.package = value.to_string(),
            "bounds" => {
                if let Some(b) = Bounds::from_string(&value) {
                    bounds = b;
                }
            }
            "clickable" => node.clickable = flag,
            "enabled" => node.enabled = flag,
            "focused" => node.focused = flag,
            "checked" => node.checked = flag,
            "selected" => node.selected = flag,
            "scrollable" => node.scrollable = flag,
            "visible-to-user" => visible_to_user = flag,
            _ => {}
        }
    }

    node.name = if resource_id.is_empty() {
        node.node_type.clone()
    } else {
        resource_id
    };
    node.visible = visible_to_user && !bounds.is_empty();

    let (w, h) = (screen.width.max(1) as f64, screen.height.max(1) as f64);
    let cx = (bounds.left + bounds.right) as f64 / 2.0;
    let cy = (bounds.top + bounds.bottom) as f64 / 2.0;
    node.at(cx / w, cy / h).with_size(
        (bounds.right - bounds.left).max(0) as f64 / w,
        (bounds.bottom - bounds.top).max(0) as f64 / h,
    )
}

/// Parse a uiautomator hierarchy dump into a nested snapshot
///
/// Bounds are normalized by `screen`. The `<hierarchy>` element itself plays the role
/// of the synthetic root.
pub fn parse_hierarchy(xml: &str, screen: Resolution) -> Result<UiTreeSnapshot> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut roots: Vec<UiNode> = Vec::new();
    let mut stack: Vec<UiNode> = Vec::new();
    let mut buf = Vec::new();

    fn attach(node: UiNode, stack: &mut [UiNode], roots: &mut Vec<UiNode>) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"node" => {
                stack.push(node_from_element(e, screen));
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"node" => {
                let node = node_from_element(e, screen);
                attach(node, &mut stack, &mut roots);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"node" => {
                if let Some(node) = stack.pop() {
                    attach(node, &mut stack, &mut roots);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LocateError::device(format!(
                    "malformed uiautomator dump at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    // Unterminated nodes in a truncated dump
    while let Some(node) = stack.pop() {
        attach(node, &mut stack, &mut roots);
    }

    Ok(UiTreeSnapshot::new(roots).with_screen(screen))
}
