pub mod merge;

pub use merge::Connection;
pub use merge::Edge;
pub use merge::Keyed;
pub use merge::OffsetPage;
pub use merge::PageArgs;
pub use merge::PageInfo;
pub use merge::merge_cursor;
pub use merge::merge_offset;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::FieldPolicy;
use crate::config::PaginationStyle;
use crate::operation::KeyScope;
use crate::operation::Operation;
use crate::operation::PageTarget;
use crate::operation::QueryKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("field `{field}` is not a valid {style:?} page: {source}")]
    Shape {
        field: String,
        style: PaginationStyle,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Offset(Keyed<OffsetPage<Value>>),
    Cursor(Keyed<Connection<Value>>),
    /// A response stored as-is, with paginated fields already merged.
    Plain { key: QueryKey, data: Value },
}

/// How much of a result set is loaded and where the next page starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub loaded: usize,
    pub total_count: Option<u64>,
    pub has_more: bool,
    #[serde(skip)]
    pub next: Option<PageTarget>,
}

impl CacheEntry {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEntry::Offset(keyed) => &keyed.key,
            CacheEntry::Cursor(keyed) => &keyed.key,
            CacheEntry::Plain { key, .. } => key,
        }
    }

    pub fn to_value(&self) -> Result<Value, CacheError> {
        Ok(match self {
            CacheEntry::Offset(keyed) => serde_json::to_value(&keyed.entry)?,
            CacheEntry::Cursor(keyed) => serde_json::to_value(&keyed.entry)?,
            CacheEntry::Plain { data, .. } => data.clone(),
        })
    }

    pub fn summary(&self) -> PageSummary {
        match self {
            CacheEntry::Offset(Keyed { entry, .. }) => PageSummary {
                loaded: entry.nodes.len(),
                total_count: Some(entry.total_count),
                has_more: entry.has_next_page,
                next: entry
                    .has_next_page
                    .then(|| PageTarget::Page(entry.current_page.saturating_add(1))),
            },
            CacheEntry::Cursor(Keyed { entry, .. }) => {
                let next = entry
                    .page_info
                    .end_cursor
                    .clone()
                    .filter(|_| entry.page_info.has_next_page)
                    .map(PageTarget::After);
                PageSummary {
                    loaded: entry.edges.len(),
                    total_count: entry.total_count,
                    has_more: next.is_some(),
                    next,
                }
            }
            CacheEntry::Plain { .. } => PageSummary::default(),
        }
    }
}

/// Process-lifetime store of merged results. Paginated root fields named by a
/// [`FieldPolicy`] are folded page by page into one entry per result set;
/// everything else is stored per operation.
#[derive(Debug, Default)]
pub struct QueryCache {
    policies: Vec<FieldPolicy>,
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
}

impl QueryCache {
    pub fn new(policies: Vec<FieldPolicy>) -> Self {
        Self {
            policies,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn policies(&self) -> &[FieldPolicy] {
        &self.policies
    }

    pub fn policy(&self, field: &str) -> Option<&FieldPolicy> {
        self.policies.iter().find(|policy| policy.field == field)
    }

    /// Storage slot for `field` under the given variables. Policies with
    /// explicit key arguments share one slot across the remaining filters.
    pub fn slot_key(&self, field: &str, variables: &Map<String, Value>) -> QueryKey {
        let key_args = self.policy(field).and_then(|policy| policy.key_args.as_deref());
        QueryKey::derive(KeyScope::Field(field.to_string()), variables, key_args)
    }

    /// Identity of the list `field` returns for these variables. Every
    /// non-pagination argument counts, so lists sharing a slot stay apart.
    /// Merged entries remember this key.
    pub fn list_key(&self, field: &str, variables: &Map<String, Value>) -> QueryKey {
        QueryKey::for_field(field, variables)
    }

    /// Folds a response into the cache and returns the data as consumers
    /// should see it, with every policy field replaced by its merged entry.
    pub fn write(&self, operation: &Operation, data: Value) -> Result<Value, CacheError> {
        let mut entries = self.entries.write();
        let mut fields = match data {
            Value::Object(fields) => fields,
            other => {
                entries.insert(
                    operation.key(),
                    CacheEntry::Plain {
                        key: operation.key(),
                        data: other.clone(),
                    },
                );
                return Ok(other);
            }
        };

        let variables = operation.variables();
        let args = PageArgs::from_variables(variables);
        for policy in &self.policies {
            let Some(raw) = fields.get(&policy.field).filter(|value| !value.is_null()) else {
                continue;
            };
            let slot = self.slot_key(&policy.field, variables);
            let list = self.list_key(&policy.field, variables);
            let merged = merge_field(policy, raw.clone(), entries.get(&slot), &list, &args)?;
            let view = merged.to_value()?;
            debug!(field = %policy.field, key = %list, summary = ?merged.summary(), "merged page into cache");
            entries.insert(slot, merged);
            fields.insert(policy.field.clone(), view);
        }

        let data = Value::Object(fields);
        entries.insert(
            operation.key(),
            CacheEntry::Plain {
                key: operation.key(),
                data: data.clone(),
            },
        );
        Ok(data)
    }

    /// Cached data for `operation`, with policy fields reflecting the latest
    /// merged entries.
    pub fn read(&self, operation: &Operation) -> Option<Value> {
        let entries = self.entries.read();
        let Some(CacheEntry::Plain { data, .. }) = entries.get(&operation.key()) else {
            return None;
        };
        let mut data = data.clone();
        if let Value::Object(fields) = &mut data {
            for policy in &self.policies {
                if !fields.contains_key(&policy.field) {
                    continue;
                }
                let slot = self.slot_key(&policy.field, operation.variables());
                let list = self.list_key(&policy.field, operation.variables());
                if let Some(view) = entries
                    .get(&slot)
                    .filter(|entry| entry.key() == &list)
                    .and_then(|entry| entry.to_value().ok())
                {
                    fields.insert(policy.field.clone(), view);
                }
            }
        }
        Some(data)
    }

    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Summary of the merged entry backing `field` for these variables.
    /// `None` when the slot is empty or currently holds another list.
    pub fn summary(&self, field: &str, variables: &Map<String, Value>) -> Option<PageSummary> {
        let slot = self.slot_key(field, variables);
        let list = self.list_key(field, variables);
        self.entries
            .read()
            .get(&slot)
            .filter(|entry| entry.key() == &list)
            .map(CacheEntry::summary)
    }

    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drops every merged entry of `field` and every stored response that
    /// contains it. Returns the number of entries removed.
    pub fn invalidate_field(&self, field: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| {
            let holds_field = match entry {
                CacheEntry::Plain { data, .. } => data.get(field).is_some(),
                CacheEntry::Offset(_) | CacheEntry::Cursor(_) => false,
            };
            !key.is_field(field) && !holds_field
        });
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn merge_field(
    policy: &FieldPolicy,
    raw: Value,
    existing: Option<&CacheEntry>,
    list: &QueryKey,
    args: &PageArgs,
) -> Result<CacheEntry, CacheError> {
    let shape_error = |source| CacheError::Shape {
        field: policy.field.clone(),
        style: policy.style,
        source,
    };
    Ok(match policy.style {
        PaginationStyle::Offset => {
            let incoming = serde_json::from_value(raw).map_err(shape_error)?;
            let existing = match existing {
                Some(CacheEntry::Offset(keyed)) => Some(keyed),
                _ => None,
            };
            CacheEntry::Offset(merge_offset(existing, incoming, list, args))
        }
        PaginationStyle::Cursor => {
            let incoming = serde_json::from_value(raw).map_err(shape_error)?;
            let existing = match existing {
                Some(CacheEntry::Cursor(keyed)) => Some(keyed),
                _ => None,
            };
            CacheEntry::Cursor(merge_cursor(existing, incoming, list, args))
        }
    })
}
