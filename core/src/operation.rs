use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::fmt;

/// Variables that say where in a result set a page starts. Replaced when
/// building the request for another page.
pub const POSITION_ARGS: &[&str] = &["page", "after", "before", "offset"];

/// Variables that size a page. Sent with every page of a list.
pub const PAGE_SIZE_ARGS: &[&str] = &["first", "last", "limit", "perPage", "pageSize"];

pub fn is_position_arg(name: &str) -> bool {
    POSITION_ARGS.contains(&name)
}

/// Position and size arguments select a page rather than the result set, so
/// neither participates in a [`QueryKey`].
pub fn is_pagination_arg(name: &str) -> bool {
    is_position_arg(name) || PAGE_SIZE_ARGS.contains(&name)
}

/// A GraphQL operation together with its variables. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    document: String,
    operation_name: Option<String>,
    variables: Map<String, Value>,
}

impl Operation {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            operation_name: None,
            variables: Map::new(),
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Copy of this operation with its position arguments removed, i.e. the
    /// request for the first page of the same result set. Page size is kept.
    pub fn first_page(&self) -> Self {
        let mut first = self.clone();
        first.variables.retain(|name, _| !is_position_arg(name));
        first
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Short label used in logs and cache keys: the operation name when
    /// present, otherwise the first line of the document.
    pub fn identity(&self) -> &str {
        match self.operation_name.as_deref() {
            Some(name) => name,
            None => self.document.lines().next().unwrap_or_default().trim(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::for_operation(self)
    }

    /// JSON body sent to the GraphQL endpoint.
    pub fn request_body(&self) -> Value {
        let mut body = json!({
            "query": self.document,
            "variables": Value::Object(self.variables.clone()),
        });
        if let (Some(name), Value::Object(map)) = (self.operation_name.as_ref(), &mut body) {
            map.insert("operationName".to_string(), Value::String(name.clone()));
        }
        body
    }
}

/// Which page of a result set to request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageTarget {
    First,
    Page(u32),
    After(String),
}

impl PageTarget {
    /// `operation` with its position arguments replaced by this target.
    pub fn apply(&self, operation: &Operation) -> Operation {
        let first = operation.first_page();
        match self {
            PageTarget::First => first,
            PageTarget::Page(page) => first.with_variable("page", *page),
            PageTarget::After(cursor) => first.with_variable("after", cursor.as_str()),
        }
    }
}

impl fmt::Display for PageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageTarget::First => f.write_str("first"),
            PageTarget::Page(page) => write!(f, "page {page}"),
            PageTarget::After(cursor) => write!(f, "after {cursor}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum KeyScope {
    Operation(String),
    Field(String),
}

/// Structured identity of a logical result set: the scope it belongs to plus
/// the ordered filter-defining arguments. Both pagination merge strategies
/// derive keys through [`QueryKey::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey {
    scope: KeyScope,
    args: Vec<(String, String)>,
}

impl QueryKey {
    /// `key_args` restricts the key to the named arguments; `None` keeps every
    /// non-pagination argument. Null arguments are treated as absent.
    pub fn derive(
        scope: KeyScope,
        variables: &Map<String, Value>,
        key_args: Option<&[String]>,
    ) -> Self {
        let mut args: Vec<(String, String)> = variables
            .iter()
            .filter(|(name, value)| {
                let selected = match key_args {
                    Some(allowed) => allowed.iter().any(|arg| arg == *name),
                    None => !is_pagination_arg(name),
                };
                selected && !value.is_null()
            })
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        args.sort();
        Self { scope, args }
    }

    pub fn for_operation(operation: &Operation) -> Self {
        Self::derive(
            KeyScope::Operation(operation.identity().to_string()),
            operation.variables(),
            None,
        )
    }

    pub fn for_field(field: &str, variables: &Map<String, Value>) -> Self {
        Self::derive(KeyScope::Field(field.to_string()), variables, None)
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    pub fn is_field(&self, field: &str) -> bool {
        matches!(&self.scope, KeyScope::Field(name) if name == field)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (KeyScope::Operation(name) | KeyScope::Field(name)) = &self.scope;
        write!(f, "{name}(")?;
        for (idx, (name, value)) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn key_ignores_pagination_and_ordering() {
        let a = QueryKey::for_field(
            "signals",
            &vars(json!({"search": "fintech", "page": 2, "sort": "recent"})),
        );
        let b = QueryKey::for_field(
            "signals",
            &vars(json!({"sort": "recent", "search": "fintech", "after": "c3"})),
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"signals(search: "fintech", sort: "recent")"#);
    }

    #[test]
    fn key_changes_with_filters() {
        let a = QueryKey::for_field("signals", &vars(json!({"stage": ["seed"]})));
        let b = QueryKey::for_field("signals", &vars(json!({"stage": ["seed", "series_a"]})));
        assert_ne!(a, b);
    }

    #[test]
    fn explicit_key_args_restrict_the_key() {
        let allowed = vec!["type".to_string()];
        let a = QueryKey::derive(
            KeyScope::Field("investors".into()),
            &vars(json!({"type": "angel", "search": "a"})),
            Some(&allowed),
        );
        let b = QueryKey::derive(
            KeyScope::Field("investors".into()),
            &vars(json!({"type": "angel", "search": "b"})),
            Some(&allowed),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn null_arguments_are_absent() {
        let a = QueryKey::for_field("signals", &vars(json!({"search": null})));
        let b = QueryKey::for_field("signals", &Map::new());
        assert_eq!(a, b);
    }

    #[test]
    fn first_page_drops_cursor_arguments() {
        let op = Operation::new("query Signals { signals { nodes { id } } }")
            .with_operation_name("Signals")
            .with_variable("after", "abc")
            .with_variable("search", "ai");
        let first = op.first_page();
        assert!(first.variable("after").is_none());
        assert_eq!(first.variable("search"), Some(&json!("ai")));
        assert_eq!(op.key(), first.key());
    }

    #[test]
    fn page_size_survives_every_page() {
        let op = Operation::new("query Investors { investors { edges { cursor } } }")
            .with_variable("first", 20)
            .with_variable("after", "c4");

        let first = op.first_page();
        let next = PageTarget::After("c1".into()).apply(&op);

        assert_eq!(first.variable("first"), Some(&json!(20)));
        assert_eq!(first.variable("after"), None);
        assert_eq!(next.variable("first"), Some(&json!(20)));
        assert_eq!(next.variable("after"), Some(&json!("c1")));
        assert_eq!(op.key(), next.key());
        assert!(op.key().args().is_empty());
    }

    #[test]
    fn page_target_replaces_pagination_arguments() {
        let op = Operation::new("query Signals { signals { nodes { id } } }")
            .with_variable("page", 4)
            .with_variable("search", "ai");
        let next = PageTarget::Page(2).apply(&op);
        assert_eq!(next.variable("page"), Some(&json!(2)));
        assert_eq!(next.variable("search"), Some(&json!("ai")));

        let after = PageTarget::After("c9".into()).apply(&op);
        assert_eq!(after.variable("page"), None);
        assert_eq!(after.variable("after"), Some(&json!("c9")));
    }

    #[test]
    fn request_body_carries_operation_name() {
        let op = Operation::new("query Ping { __typename }").with_operation_name("Ping");
        assert_eq!(
            op.request_body(),
            json!({"query": "query Ping { __typename }", "variables": {}, "operationName": "Ping"})
        );
    }
}
