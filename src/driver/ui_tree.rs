//! UI-tree snapshots and structural lookup
//!
//! A snapshot is an immutable copy of the element hierarchy taken at one instant.
//! Lookups walk it in pre-order (parent before children, siblings in document
//! order), which is also the order `resolve_all` reports matches in. The synthetic
//! hierarchy root is never a match candidate.
//!
//! Snapshots can be exchanged in the poco-style JSON dump format:
//! `{"name": ..., "payload": {...}, "children": [...]}`.

use crate::driver::selector::{Attribute, Selector};
use crate::error::{LocateError, Result};
use crate::geometry::{NormPoint, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the synthetic root node in dumps
pub const ROOT_NAME: &str = "<Root>";

/// One element of the UI hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct UiNode {
    pub name: String,
    pub text: String,
    pub node_type: String,
    pub desc: String,
    pub package: String,
    /// Center of the element in screen percentages
    pub pos: NormPoint,
    /// Width and height in screen percentages
    pub size: (f64, f64),
    pub visible: bool,
    pub enabled: bool,
    pub clickable: bool,
    pub focused: bool,
    pub checked: bool,
    pub selected: bool,
    pub scrollable: bool,
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: String::new(),
            node_type: node_type.into(),
            desc: String::new(),
            package: String::new(),
            pos: NormPoint::CENTER,
            size: (0.0, 0.0),
            visible: true,
            enabled: true,
            clickable: false,
            focused: false,
            checked: false,
            selected: false,
            scrollable: false,
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Place the node; coordinates are clamped into the screen
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.pos = clamp_point(x, y);
        self
    }

    pub fn with_size(mut self, w: f64, h: f64) -> Self {
        self.size = (w.clamp(0.0, 1.0), h.clamp(0.0, 1.0));
        self
    }

    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }

    pub(crate) fn str_attr(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::Name => Some(&self.name),
            Attribute::Text => Some(&self.text),
            Attribute::Type => Some(&self.node_type),
            Attribute::Desc => Some(&self.desc),
            Attribute::Package => Some(&self.package),
            _ => None,
        }
    }

    pub(crate) fn flag_attr(&self, attribute: Attribute) -> Option<bool> {
        match attribute {
            Attribute::Visible => Some(self.visible),
            Attribute::Enabled => Some(self.enabled),
            Attribute::Clickable => Some(self.clickable),
            Attribute::Focused => Some(self.focused),
            Attribute::Checked => Some(self.checked),
            Attribute::Selected => Some(self.selected),
            Attribute::Scrollable => Some(self.scrollable),
            _ => None,
        }
    }

    /// Value of any attribute
    pub fn attr(&self, attribute: Attribute) -> AttrValue {
        match self.str_attr(attribute) {
            Some(s) => AttrValue::Text(s.to_string()),
            None => AttrValue::Flag(self.flag_attr(attribute).unwrap_or(false)),
        }
    }

    /// Pre-order walk of this node and its descendants
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }
}

impl fmt::Display for UiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node_type, self.name)?;
        if !self.text.is_empty() {
            write!(f, " {:?}", self.text)?;
        }
        write!(f, " @ {}", self.pos)
    }
}

/// Attribute value as reported by [`UiNode::attr`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Flag(bool),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// Pre-order iterator over a node tree
pub struct PreOrder<'a> {
    stack: Vec<&'a UiNode>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a UiNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Hierarchy captured at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct UiTreeSnapshot {
    /// Top-level elements; the synthetic root is implicit
    roots: Vec<UiNode>,
    /// Screen the tree was dumped from, when known
    screen: Option<Resolution>,
}

impl UiTreeSnapshot {
    pub fn new(roots: Vec<UiNode>) -> Self {
        Self {
            roots,
            screen: None,
        }
    }

    pub fn with_screen(mut self, screen: Resolution) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn roots(&self) -> &[UiNode] {
        &self.roots
    }

    pub fn screen(&self) -> Option<Resolution> {
        self.screen
    }

    /// All real elements in pre-order
    pub fn iter(&self) -> impl Iterator<Item = &UiNode> {
        self.roots.iter().flat_map(|r| r.iter())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Parse a poco-style JSON dump
    ///
    /// A top-level node named `<Root>` is treated as the synthetic root and dropped.
    pub fn from_json(json: &str) -> Result<Self> {
        let dump: DumpNode = serde_json::from_str(json)
            .map_err(|e| LocateError::invalid(format!("malformed hierarchy dump: {}", e)))?;
        let roots = if dump.name == ROOT_NAME {
            dump.children.into_iter().map(UiNode::from).collect()
        } else {
            vec![UiNode::from(dump)]
        };
        Ok(Self::new(roots))
    }

    /// Serialize as a poco-style JSON dump under a synthetic root
    pub fn to_json(&self) -> Result<String> {
        let mut root = DumpNode::from(&UiNode::new(ROOT_NAME, "Root").with_size(1.0, 1.0));
        root.children = self.roots.iter().map(DumpNode::from).collect();
        serde_json::to_string_pretty(&root)
            .map_err(|e| LocateError::invalid(format!("cannot serialize hierarchy: {}", e)))
    }
}

/// Every node matching the selector's predicates, in pre-order
///
/// The selector's index is ignored here; see [`resolve`].
pub fn resolve_all<'a>(selector: &Selector, snapshot: &'a UiTreeSnapshot) -> Vec<&'a UiNode> {
    snapshot
        .iter()
        .filter(|node| selector.matches_node(node))
        .collect()
}

/// The single node a selector designates
///
/// Without an index this is the first match. With index `k` it is the k-th match, and
/// asking past the end is an error rather than "not found".
pub fn resolve<'a>(
    selector: &Selector,
    snapshot: &'a UiTreeSnapshot,
) -> Result<Option<&'a UiNode>> {
    let mut matches = snapshot.iter().filter(|node| selector.matches_node(node));
    match selector.get_index() {
        None => Ok(matches.next()),
        Some(index) => {
            let all: Vec<_> = matches.collect();
            let count = all.len();
            all.into_iter()
                .nth(index)
                .map(Some)
                .ok_or(LocateError::IndexOutOfRange { index, count })
        }
    }
}

fn clamp_point(x: f64, y: f64) -> NormPoint {
    let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    NormPoint {
        x: clamp(x),
        y: clamp(y),
    }
}

// ============================================================================
// Dump format
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct DumpNode {
    name: String,
    #[serde(default)]
    payload: DumpPayload,
    #[serde(default)]
    children: Vec<DumpNode>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct DumpPayload {
    name: String,
    text: String,
    #[serde(rename = "type")]
    node_type: String,
    desc: String,
    package: String,
    pos: [f64; 2],
    size: [f64; 2],
    visible: bool,
    enabled: bool,
    #[serde(alias = "clickable")]
    touchable: bool,
    focused: bool,
    checked: bool,
    selected: bool,
    scrollable: bool,
}

impl Default for DumpPayload {
    fn default() -> Self {
        Self {
            name: String::new(),
            text: String::new(),
            node_type: String::new(),
            desc: String::new(),
            package: String::new(),
            pos: [0.5, 0.5],
            size: [0.0, 0.0],
            visible: true,
            enabled: true,
            touchable: false,
            focused: false,
            checked: false,
            selected: false,
            scrollable: false,
        }
    }
}

impl From<DumpNode> for UiNode {
    fn from(dump: DumpNode) -> Self {
        let p = dump.payload;
        let name = if p.name.is_empty() { dump.name } else { p.name };
        UiNode {
            name,
            text: p.text,
            node_type: p.node_type,
            desc: p.desc,
            package: p.package,
            pos: clamp_point(p.pos[0], p.pos[1]),
            size: (p.size[0].clamp(0.0, 1.0), p.size[1].clamp(0.0, 1.0)),
            visible: p.visible,
            enabled: p.enabled,
            clickable: p.touchable,
            focused: p.focused,
            checked: p.checked,
            selected: p.selected,
            scrollable: p.scrollable,
            children: dump.children.into_iter().map(UiNode::from).collect(),
        }
    }
}

impl From<&UiNode> for DumpNode {
    fn from(node: &UiNode) -> Self {
        DumpNode {
            name: node.name.clone(),
            payload: DumpPayload {
                name: node.name.clone(),
                text: node.text.clone(),
                node_type: node.node_type.clone(),
                desc: node.desc.clone(),
                package: node.package.clone(),
                pos: [node.pos.x, node.pos.y],
                size: [node.size.0, node.size.1],
                visible: node.visible,
                enabled: node.enabled,
                touchable: node.clickable,
                focused: node.focused,
                checked: node.checked,
                selected: node.selected,
                scrollable: node.scrollable,
            },
            children: node.children.iter().map(DumpNode::from).collect(),
        }
    }
}
