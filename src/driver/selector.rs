//! Structural selectors for UI-tree lookup
//!
//! A selector is a conjunction of attribute predicates plus an optional index into the
//! ordered match set. Keyword construction follows the usual `text="..."` /
//! `textMatches="..."` convention; unknown attribute names are rejected up front.

use crate::error::{LocateError, Result};
use regex::Regex;
use std::fmt;

/// Attributes a predicate may test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Name,
    Text,
    Type,
    Desc,
    Package,
    Visible,
    Enabled,
    Clickable,
    Focused,
    Checked,
    Selected,
    Scrollable,
}

impl Attribute {
    pub const ALL: [Attribute; 12] = [
        Attribute::Name,
        Attribute::Text,
        Attribute::Type,
        Attribute::Desc,
        Attribute::Package,
        Attribute::Visible,
        Attribute::Enabled,
        Attribute::Clickable,
        Attribute::Focused,
        Attribute::Checked,
        Attribute::Selected,
        Attribute::Scrollable,
    ];

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == name)
            .ok_or_else(|| LocateError::invalid(format!("unknown selector attribute '{}'", name)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Name => "name",
            Attribute::Text => "text",
            Attribute::Type => "type",
            Attribute::Desc => "desc",
            Attribute::Package => "package",
            Attribute::Visible => "visible",
            Attribute::Enabled => "enabled",
            Attribute::Clickable => "clickable",
            Attribute::Focused => "focused",
            Attribute::Checked => "checked",
            Attribute::Selected => "selected",
            Attribute::Scrollable => "scrollable",
        }
    }

    pub fn is_flag(&self) -> bool {
        !matches!(
            self,
            Attribute::Name | Attribute::Text | Attribute::Type | Attribute::Desc | Attribute::Package
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a predicate compares the node's attribute value
#[derive(Debug, Clone)]
pub enum Comparison {
    Equals(String),
    /// Regex anchored at the start of the value
    Matches(Regex),
    Is(bool),
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub attribute: Attribute,
    pub comparison: Comparison,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            Comparison::Equals(v) => write!(f, "{}={:?}", self.attribute, v),
            Comparison::Matches(re) => {
                let pattern = re.as_str();
                let raw = pattern
                    .strip_prefix("^(?:")
                    .and_then(|p| p.strip_suffix(')'))
                    .unwrap_or(pattern);
                write!(f, "{}Matches={:?}", self.attribute, raw)
            }
            Comparison::Is(b) => write!(f, "{}={}", self.attribute, b),
        }
    }
}

/// Attribute predicates (all must hold) and an optional index
#[derive(Debug, Clone, Default)]
pub struct Selector {
    predicates: Vec<Predicate>,
    index: Option<usize>,
}

impl Selector {
    /// Selector matching every node
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from keyword pairs such as `("text", "我的")`, `("nameMatches", ".*exit")`
    /// or `("index", "2")`
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut selector = Selector::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == "index" {
                let index = value.parse::<usize>().map_err(|_| {
                    LocateError::invalid(format!("index must be a non-negative integer, got '{}'", value))
                })?;
                selector = selector.index(index);
            } else if let Some(attr) = key.strip_suffix("Matches") {
                selector = selector.matches(Attribute::from_name(attr)?, value)?;
            } else {
                selector = selector.with(Attribute::from_name(key)?, value)?;
            }
        }
        Ok(selector)
    }

    /// Add an equality predicate; flag attributes take "true"/"false"
    pub fn with(mut self, attribute: Attribute, value: &str) -> Result<Self> {
        let comparison = if attribute.is_flag() {
            Comparison::Is(parse_flag(attribute, value)?)
        } else {
            Comparison::Equals(value.to_string())
        };
        self.predicates.push(Predicate {
            attribute,
            comparison,
        });
        Ok(self)
    }

    /// Add a regex predicate on a string attribute
    pub fn matches(mut self, attribute: Attribute, pattern: &str) -> Result<Self> {
        if attribute.is_flag() {
            return Err(LocateError::invalid(format!(
                "'{}' is a flag and cannot be matched with a pattern",
                attribute
            )));
        }
        let re = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            LocateError::invalid(format!("invalid pattern for {}Matches: {}", attribute, e))
        })?;
        self.predicates.push(Predicate {
            attribute,
            comparison: Comparison::Matches(re),
        });
        Ok(self)
    }

    pub fn name(self, value: &str) -> Self {
        self.push_eq(Attribute::Name, value)
    }

    pub fn text(self, value: &str) -> Self {
        self.push_eq(Attribute::Text, value)
    }

    pub fn node_type(self, value: &str) -> Self {
        self.push_eq(Attribute::Type, value)
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn get_index(&self) -> Option<usize> {
        self.index
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn push_eq(mut self, attribute: Attribute, value: &str) -> Self {
        self.predicates.push(Predicate {
            attribute,
            comparison: Comparison::Equals(value.to_string()),
        });
        self
    }

    /// Check a single node against every predicate
    pub fn matches_node(&self, node: &crate::driver::ui_tree::UiNode) -> bool {
        self.predicates.iter().all(|p| match &p.comparison {
            Comparison::Equals(v) => node.str_attr(p.attribute) == Some(v.as_str()),
            Comparison::Matches(re) => node
                .str_attr(p.attribute)
                .map_or(false, |value| re.is_match(value)),
            Comparison::Is(b) => node.flag_attr(p.attribute) == Some(*b),
        })
    }
}

fn parse_flag(attribute: Attribute, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(LocateError::invalid(format!(
            "'{}' expects true/false, got '{}'",
            attribute, value
        ))),
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.predicates.iter().map(|p| p.to_string()).collect();
        write!(f, "Selector({})", parts.join(", "))?;
        if let Some(i) = self.index {
            write!(f, "[{}]", i)?;
        }
        Ok(())
    }
}
