//! Pure page-merge functions for the two pagination styles the backend
//! speaks. Both take the remembered entry (if any), the page that just
//! arrived and the arguments it was requested with, and return the entry to
//! store. Node order is always fetch order.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashSet;

use crate::operation::QueryKey;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetPage<T> {
    pub nodes: Vec<T>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    #[serde(default)]
    pub page_info: PageInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

/// A merged entry together with the key of the result set it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<E> {
    pub key: QueryKey,
    pub entry: E,
}

/// The pagination arguments a page was requested with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageArgs {
    pub page: Option<u32>,
    pub after: Option<String>,
}

impl PageArgs {
    pub fn from_variables(variables: &Map<String, Value>) -> Self {
        Self {
            page: variables
                .get("page")
                .and_then(Value::as_u64)
                .and_then(|page| u32::try_from(page).ok()),
            after: variables
                .get("after")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Page 1 (or no page) replaces the entry; later pages append. A page at or
/// before the one merged last for the same key is a re-delivery and leaves
/// the entry untouched.
pub fn merge_offset<T: Clone>(
    existing: Option<&Keyed<OffsetPage<T>>>,
    incoming: OffsetPage<T>,
    key: &QueryKey,
    args: &PageArgs,
) -> Keyed<OffsetPage<T>> {
    let page = args.page.unwrap_or(1).max(1);
    let existing = existing.filter(|existing| &existing.key == key);

    let Some(existing) = existing.filter(|_| page > 1) else {
        return Keyed {
            key: key.clone(),
            entry: OffsetPage {
                current_page: page,
                ..incoming
            },
        };
    };

    if page <= existing.entry.current_page {
        return existing.clone();
    }

    let mut nodes = existing.entry.nodes.clone();
    nodes.extend(incoming.nodes);
    Keyed {
        key: key.clone(),
        entry: OffsetPage {
            nodes,
            total_count: incoming.total_count,
            current_page: page,
            total_pages: incoming.total_pages,
            has_next_page: incoming.has_next_page,
        },
    }
}

/// No `after` cursor, or a key different from the remembered one, replaces
/// the entry. Otherwise edges are appended, skipping cursors the entry
/// already holds.
pub fn merge_cursor<T: Clone>(
    existing: Option<&Keyed<Connection<T>>>,
    incoming: Connection<T>,
    key: &QueryKey,
    args: &PageArgs,
) -> Keyed<Connection<T>> {
    let existing = existing.filter(|existing| &existing.key == key && args.after.is_some());
    let Some(existing) = existing else {
        return Keyed {
            key: key.clone(),
            entry: incoming,
        };
    };

    let seen: HashSet<&str> = existing
        .entry
        .edges
        .iter()
        .map(|edge| edge.cursor.as_str())
        .collect();
    let fresh: Vec<Edge<T>> = incoming
        .edges
        .into_iter()
        .filter(|edge| !seen.contains(edge.cursor.as_str()))
        .collect();

    let mut edges = existing.entry.edges.clone();
    edges.extend(fresh);
    let page_info = PageInfo {
        has_next_page: incoming.page_info.has_next_page,
        has_previous_page: existing.entry.page_info.has_previous_page,
        start_cursor: existing
            .entry
            .page_info
            .start_cursor
            .clone()
            .or(incoming.page_info.start_cursor),
        end_cursor: incoming
            .page_info
            .end_cursor
            .or_else(|| existing.entry.page_info.end_cursor.clone()),
    };
    Keyed {
        key: key.clone(),
        entry: Connection {
            edges,
            page_info,
            total_count: incoming.total_count.or(existing.entry.total_count),
        },
    }
}
