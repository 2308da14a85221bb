//! Query and page types shared by the store implementations.

use std::cmp::Ordering;

use regex::Regex;
use serde::Serialize;

use crate::model::{Component, ComponentId, ComponentType, Connection};

/// Default page size for component and connection queries.
pub const DEFAULT_LIMIT: usize = 20;

/// Text filter applied to a component's name and description.
///
/// `/expr/` is a regular expression; anything else is a plain substring.
#[derive(Debug, Clone)]
pub enum TextPattern {
    Regex(Regex),
    Substring(String),
}

impl TextPattern {
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let expr = &pattern[1..pattern.len() - 1];
            Ok(Self::Regex(Regex::new(expr)?))
        } else {
            Ok(Self::Substring(pattern.to_string()))
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(text),
            Self::Substring(s) => text.contains(s.as_str()),
        }
    }
}

/// Field a component listing can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Name,
    Type,
    Version,
    Since,
}

/// Sort keys for a component listing; id is always the final tie breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentOrder {
    keys: Vec<(SortField, bool)>,
}

impl ComponentOrder {
    /// Parse `name,-since` style order lists. A leading `-` sorts descending.
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut keys = Vec::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (ascending, name) = match raw.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, raw.strip_prefix('+').unwrap_or(raw)),
            };
            let field = match name {
                "id" => SortField::Id,
                "name" => SortField::Name,
                "type" => SortField::Type,
                "version" => SortField::Version,
                "since" => SortField::Since,
                other => return Err(format!("unknown sort field: {}", other)),
            };
            keys.push((field, ascending));
        }
        Ok(Self { keys })
    }

    pub fn compare(&self, a: &Component, b: &Component) -> Ordering {
        for (field, ascending) in &self.keys {
            let ordering = match field {
                SortField::Id => a.id.cmp(&b.id),
                SortField::Name => a.name.cmp(&b.name),
                SortField::Type => a.component_type.cmp(&b.component_type),
                SortField::Version => version_key(&a.version)
                    .cmp(&version_key(&b.version))
                    .then_with(|| a.version.cmp(&b.version)),
                SortField::Since => a.since.cmp(&b.since),
            };
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

/// Numeric `(major, minor, patch)` of a `MAJOR.MINOR.PATCH` version.
fn version_key(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.').map(|part| part.parse::<u64>().ok());
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Some(major)), Some(Some(minor)), Some(Some(patch)), None) => {
            Some((major, minor, patch))
        }
        _ => None,
    }
}

/// Filter and window over active components.
#[derive(Debug, Clone)]
pub struct ComponentQuery {
    pub pattern: Option<TextPattern>,
    pub component_type: Option<ComponentType>,
    pub order: ComponentOrder,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ComponentQuery {
    fn default() -> Self {
        Self {
            pattern: None,
            component_type: None,
            order: ComponentOrder::default(),
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ComponentQuery {
    /// Whether an active component passes the filters.
    pub fn accepts(&self, component: &Component) -> bool {
        if !component.is_active() {
            return false;
        }
        if let Some(t) = self.component_type {
            if component.component_type != t {
                return false;
            }
        }
        match &self.pattern {
            None => true,
            Some(p) => {
                p.is_match(&component.name)
                    || component
                        .description
                        .as_deref()
                        .is_some_and(|d| p.is_match(d))
            }
        }
    }

    /// Filter, sort and window a candidate set into a page.
    pub fn paginate(&self, candidates: impl IntoIterator<Item = Component>) -> ComponentPage {
        let mut matching: Vec<Component> = candidates
            .into_iter()
            .filter(|c| self.accepts(c))
            .collect();
        matching.sort_by(|a, b| self.order.compare(a, b));

        let total = matching.len() as u64;
        let components = matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();

        ComponentPage { total, components }
    }
}

/// One window of a component listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentPage {
    /// Number of components matching the filters, across all pages.
    pub total: u64,
    pub components: Vec<Component>,
}

/// Filter and window over connections, ordered by id.
#[derive(Debug, Clone)]
pub struct ConnectionQuery {
    /// Only connections where this component is source or target.
    pub component: Option<ComponentId>,
    pub include_deleted: bool,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ConnectionQuery {
    fn default() -> Self {
        Self {
            component: None,
            include_deleted: false,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ConnectionQuery {
    pub fn accepts(&self, connection: &Connection) -> bool {
        if !self.include_deleted && !connection.is_live() {
            return false;
        }
        match &self.component {
            Some(id) => connection.involves(id),
            None => true,
        }
    }

    /// Filter and window candidates already sorted by id.
    pub fn paginate(&self, candidates: impl IntoIterator<Item = Connection>) -> ConnectionPage {
        let matching: Vec<Connection> = candidates
            .into_iter()
            .filter(|c| self.accepts(c))
            .collect();
        let total = matching.len() as u64;
        let connections = matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();

        ConnectionPage { total, connections }
    }
}

/// One window of a connection listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionPage {
    pub total: u64,
    pub connections: Vec<Connection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, name: &str, since: i64) -> Component {
        Component {
            id: ComponentId::from(id),
            component_type: ComponentType::C1,
            name: name.to_string(),
            description: Some(format!("{} description", name)),
            version: "1.0.0".into(),
            api_version: "1.0.0".into(),
            since,
            finished_time: None,
            channels: vec![],
        }
    }

    #[test]
    fn test_text_pattern_regex_and_substring() {
        let re = TextPattern::parse("/^c1_.*r$/").expect("valid regex");
        assert!(re.is_match("c1_planner"));
        assert!(!re.is_match("c0_planner_x"));

        let plain = TextPattern::parse("plan").expect("plain");
        assert!(plain.is_match("c1_planner"));
        assert!(TextPattern::parse("/(/").is_err());
    }

    #[test]
    fn test_order_parse_and_compare() {
        let order = ComponentOrder::parse("-since, name").expect("valid order");
        let a = component("a", "c1_b", 1);
        let b = component("b", "c1_a", 2);
        assert_eq!(order.compare(&a, &b), Ordering::Greater);
        assert!(ComponentOrder::parse("colour").is_err());
    }

    #[test]
    fn test_order_by_version_is_numeric() {
        let mut old = component("a", "c1_old", 0);
        old.version = "9.0.0".into();
        let mut new = component("b", "c1_new", 0);
        new.version = "10.0.0".into();
        let mut patched = component("c", "c1_patched", 0);
        patched.version = "9.0.10".into();

        let order = ComponentOrder::parse("version").expect("valid order");
        let mut sorted = vec![new.clone(), patched.clone(), old.clone()];
        sorted.sort_by(|a, b| order.compare(a, b));
        let names: Vec<_> = sorted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c1_old", "c1_patched", "c1_new"]);

        let descending = ComponentOrder::parse("-version").expect("valid order");
        assert_eq!(descending.compare(&new, &old), Ordering::Less);
    }

    #[test]
    fn test_paginate_counts_total_and_windows() {
        let query = ComponentQuery {
            pattern: Some(TextPattern::parse("c1_").expect("plain")),
            offset: 1,
            limit: 1,
            ..Default::default()
        };
        let mut finished = component("z", "c1_gone", 0);
        finished.finished_time = Some(5);

        let page = query.paginate(vec![
            component("b", "c1_b", 0),
            component("a", "c1_a", 0),
            finished,
        ]);

        assert_eq!(page.total, 2);
        assert_eq!(page.components.len(), 1);
        assert_eq!(page.components[0].id.as_str(), "b");
    }

    #[test]
    fn test_pattern_matches_description() {
        let query = ComponentQuery {
            pattern: Some(TextPattern::parse("/description$/").expect("regex")),
            ..Default::default()
        };
        assert!(query.accepts(&component("a", "c1_a", 0)));
    }
}
