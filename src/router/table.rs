use crate::router::config::TableConfig;
use crate::router::method::Method;
use crate::router::path::compiled::{CompiledMatcher, FastMatch};
use crate::router::path::trie::TrieMatcher;
use crate::router::path::{PatternError, compile};
use fnv::FnvBuildHasher;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while registering a route.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route pattern is malformed.")]
    Pattern {
        #[from]
        source: PatternError,
    },

    #[error(
        "Route '{pattern}' declares parameter '{attempted}' where '{existing}' is already registered."
    )]
    AmbiguousRoute {
        pattern: String,
        existing: String,
        attempted: String,
    },

    #[error("Route table is frozen, '{method} {pattern}' cannot be added.")]
    MatcherFrozen { method: Method, pattern: String },
}

impl RouteError {
    #[inline]
    pub(crate) fn ambiguous(
        pattern: impl Into<String>,
        existing: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        Self::AmbiguousRoute {
            pattern: pattern.into(),
            existing: existing.into(),
            attempted: attempted.into(),
        }
    }

    #[inline]
    pub(crate) fn frozen(method: Method, pattern: impl Into<String>) -> Self {
        Self::MatcherFrozen {
            method,
            pattern: pattern.into(),
        }
    }
}

/// Path parameters bound by a match, in path order.
///
/// Values are the raw request segments; nothing is percent-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    /// Creates an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds parameters from `(name, value)` pairs, keeping their order.
    pub(crate) fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// Returns the value bound to `name`. The wildcard capture is bound as `*`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over `(name, value)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of bound parameters, the wildcard capture included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the matched pattern bound nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The outcome of a successful lookup.
///
/// `chain` borrows from the frozen table, `params` belong to the request.
#[derive(Debug, PartialEq)]
pub struct MatchResult<'t, T> {
    chain: &'t [T],
    params: Params,
}

impl<'t, T> MatchResult<'t, T> {
    fn new(chain: &'t [T], params: Params) -> Self {
        Self { chain, params }
    }

    /// Items registered for the matched pattern, in registration order.
    pub fn chain(&self) -> &'t [T] {
        self.chain
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_parts(self) -> (&'t [T], Params) {
        (self.chain, self.params)
    }
}

/// Both matchers for one method.
struct MethodTable<T> {
    trie: TrieMatcher<T>,
    compiled: CompiledMatcher<T>,
}

impl<T> MethodTable<T> {
    fn new(max_groups: usize) -> Self {
        Self {
            trie: TrieMatcher::new(),
            compiled: CompiledMatcher::new(max_groups),
        }
    }

    fn find<'t>(&'t self, path: &str, fast_path: bool) -> Option<MatchResult<'t, T>> {
        if fast_path {
            match self.compiled.find(path) {
                FastMatch::Hit {
                    items,
                    params,
                    trusted: true,
                } => return Some(MatchResult::new(items, params)),
                FastMatch::Hit { .. } => {
                    log::trace!("Fast-path hit for '{path}' may be outranked, checking trie");
                }
                FastMatch::Miss if self.compiled.is_total() => return None,
                FastMatch::Miss | FastMatch::Unavailable => {}
            }
        }
        self.trie
            .find(path)
            .map(|(items, params)| MatchResult::new(items, params))
    }
}

/// Per-method route table combining the trie and the composite-regex fast path.
///
/// # Behavior
/// While open, `add` compiles each pattern, inserts it into the trie (always) and
/// offers it to the fast path, tracking per method whether every route was
/// representable there. `build`, or the first `find`, freezes the table: later
/// `add` calls fail with `RouteError::MatcherFrozen`.
///
/// A frozen table has no mutable state and can be shared across threads.
///
/// Lookup for a method whose routes are all representable uses the fast path
/// alone. Otherwise a fast-path hit is accepted only when no trie-only route could
/// outrank it; every other case is answered by the trie.
pub struct RouteTable<T> {
    config: TableConfig,
    methods: HashMap<Method, MethodTable<T>, FnvBuildHasher>,
    frozen: OnceCell<()>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTable<T> {
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            config,
            methods: HashMap::with_hasher(FnvBuildHasher::default()),
            frozen: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Registers `item` for `method` requests matching `pattern`.
    ///
    /// Items registered for the same method and pattern accumulate in order.
    ///
    /// # Errors
    /// - `RouteError::MatcherFrozen` once the table is built.
    /// - `RouteError::Pattern` for a malformed pattern.
    /// - `RouteError::AmbiguousRoute` when a differently named parameter already
    ///   occupies the same position.
    ///
    /// A failed call leaves the table as it was.
    pub fn add(&mut self, method: Method, pattern: &str, item: T) -> Result<(), RouteError>
    where
        T: Clone,
    {
        if self.is_frozen() {
            return Err(RouteError::frozen(method, pattern));
        }
        let segments = compile(pattern)?;
        let fast_path = self.config.fast_path;
        let max_groups = self.config.max_capture_groups;
        let table = self
            .methods
            .entry(method)
            .or_insert_with(|| MethodTable::new(max_groups));

        if fast_path {
            table.trie.insert(pattern, &segments, item.clone())?;
            let folded = table.compiled.insert(&segments, item);
            log::debug!("Registered {method} '{pattern}' (fast path: {folded})");
        } else {
            table.trie.insert(pattern, &segments, item)?;
            log::debug!("Registered {method} '{pattern}'");
        }
        Ok(())
    }

    /// Freezes the table and compiles the fast path. Idempotent.
    pub fn build(&self) {
        self.frozen.get_or_init(|| {
            log::info!(
                "Freezing route table with {} methods (fast path: {})",
                self.methods.len(),
                self.config.fast_path
            );
            if !self.config.fast_path {
                return;
            }
            for (method, table) in &self.methods {
                let available = table.compiled.build();
                log::debug!(
                    "{method}: {} trie entries, {} fast-path patterns, fast path {}",
                    table.trie.len(),
                    table.compiled.len(),
                    match (available, table.compiled.is_total()) {
                        (false, _) => "unavailable",
                        (true, true) => "authoritative",
                        (true, false) => "pre-filter",
                    }
                );
            }
        });
    }

    /// Looks up the items and parameters for `method` and `path`.
    ///
    /// `path` must not carry a query string. Returns `None` when nothing matches,
    /// which is an ordinary outcome rather than an error. Freezes the table if it
    /// was still open.
    pub fn find<'t>(&'t self, method: Method, path: &str) -> Option<MatchResult<'t, T>> {
        self.build();
        let table = self.methods.get(&method)?;
        table.find(path, self.config.fast_path)
    }

    /// True when some route is registered for `method`.
    pub fn has_method(&self, method: Method) -> bool {
        self.methods
            .get(&method)
            .is_some_and(|table| !table.trie.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &[(Method, &str)] = &[
        (Method::Get, "/"),
        (Method::Get, "/users"),
        (Method::Get, "/users/new"),
        (Method::Get, "/users/:id"),
        (Method::Get, "/users/:id/posts/:post"),
        (Method::Get, "/users/:id/*"),
        (Method::Get, "/files/*"),
        (Method::Get, "/docs/:page?"),
        (Method::Post, "/users"),
        (Method::Post, "/users/:id/avatar"),
    ];

    const PATHS: &[(Method, &str)] = &[
        (Method::Get, "/"),
        (Method::Get, ""),
        (Method::Get, "/users"),
        (Method::Get, "/users/"),
        (Method::Get, "/users/new"),
        (Method::Get, "/users/42"),
        (Method::Get, "/users/42/posts/7"),
        (Method::Get, "/users/42/posts"),
        (Method::Get, "/users/42/settings/privacy"),
        (Method::Get, "/files"),
        (Method::Get, "/files/a/b/c"),
        (Method::Get, "/docs"),
        (Method::Get, "/docs/intro"),
        (Method::Get, "/docs/intro/more"),
        (Method::Get, "/missing"),
        (Method::Get, "relative"),
        (Method::Post, "/users"),
        (Method::Post, "/users/1/avatar"),
        (Method::Post, "/users/1"),
        (Method::Delete, "/users/1"),
    ];

    fn table(config: TableConfig) -> RouteTable<&'static str> {
        let mut table = RouteTable::with_config(config);
        for (method, pattern) in FIXTURE {
            table.add(*method, pattern, *pattern).unwrap();
        }
        table.build();
        table
    }

    fn lookup(
        table: &RouteTable<&'static str>,
        method: Method,
        path: &str,
    ) -> Option<(Vec<&'static str>, Params)> {
        table
            .find(method, path)
            .map(|found| (found.chain().to_vec(), found.params().clone()))
    }

    #[test]
    fn accelerated_and_structural_lookups_agree() {
        let accelerated = table(TableConfig::default());
        let structural = table(TableConfig {
            fast_path: false,
            ..TableConfig::default()
        });
        let tight = table(TableConfig {
            max_capture_groups: 2,
            ..TableConfig::default()
        });
        for (method, path) in PATHS {
            let expected = lookup(&structural, *method, path);
            assert_eq!(lookup(&accelerated, *method, path), expected, "{method} {path}");
            assert_eq!(lookup(&tight, *method, path), expected, "{method} {path}");
        }
    }

    #[test]
    fn end_to_end_user_lookup() {
        let mut table = RouteTable::new();
        table.add(Method::Get, "/users/:id", "show").unwrap();
        let found = table.find(Method::Get, "/users/42").unwrap();
        assert_eq!(found.chain(), &["show"]);
        assert_eq!(found.params().get("id"), Some("42"));
        assert!(table.find(Method::Get, "/users").is_none());
        assert!(table.find(Method::Get, "/users/").is_none());
    }

    #[test]
    fn literal_priority_and_wildcard_capture() {
        let table = table(TableConfig::default());
        let (chain, params) = lookup(&table, Method::Get, "/users/new").unwrap();
        assert_eq!(chain, vec!["/users/new"]);
        assert!(params.is_empty());

        let (_, params) = lookup(&table, Method::Get, "/files/a/b/c").unwrap();
        assert_eq!(params.get("*"), Some("a/b/c"));

        let (chain, params) = lookup(&table, Method::Get, "/users/42/settings/privacy").unwrap();
        assert_eq!(chain, vec!["/users/:id/*"]);
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("*"), Some("settings/privacy"));
    }

    #[test]
    fn frozen_table_rejects_additions_and_keeps_answers() {
        let mut table = table(TableConfig::default());
        let before = lookup(&table, Method::Get, "/users/42");
        let error = table.add(Method::Get, "/late", "late").unwrap_err();
        assert_eq!(error, RouteError::frozen(Method::Get, "/late"));
        assert_eq!(lookup(&table, Method::Get, "/users/42"), before);
        assert!(lookup(&table, Method::Get, "/late").is_none());
    }

    #[test]
    fn first_lookup_freezes_implicitly() {
        let mut table = RouteTable::new();
        table.add(Method::Get, "/a", "a").unwrap();
        assert!(!table.is_frozen());
        assert!(table.find(Method::Get, "/a").is_some());
        assert!(table.is_frozen());
        assert!(matches!(
            table.add(Method::Get, "/b", "b"),
            Err(RouteError::MatcherFrozen { .. })
        ));
    }

    #[test]
    fn conflicting_params_fail_at_registration() {
        let mut table = RouteTable::new();
        table.add(Method::Get, "/users/:id", "id").unwrap();
        let error = table.add(Method::Get, "/users/:name", "name").unwrap_err();
        assert_eq!(error, RouteError::ambiguous("/users/:name", "id", "name"));
        // Other methods have their own trees.
        table.add(Method::Post, "/users/:name", "name").unwrap();
        assert_eq!(
            lookup(&table, Method::Get, "/users/x").unwrap().0,
            vec!["id"]
        );
    }

    #[test]
    fn malformed_patterns_fail() {
        let mut table: RouteTable<()> = RouteTable::new();
        assert!(matches!(
            table.add(Method::Get, "/a/*/b", ()),
            Err(RouteError::Pattern {
                source: PatternError::WildcardNotLast { .. }
            })
        ));
    }

    #[test]
    fn repeated_lookups_are_stable() {
        let table = table(TableConfig::default());
        let first = table.find(Method::Get, "/users/42/posts/7").unwrap();
        let second = table.find(Method::Get, "/users/42/posts/7").unwrap();
        assert!(std::ptr::eq(first.chain(), second.chain()));
        assert_eq!(first.params(), second.params());
    }

    #[test]
    fn optional_route_shadows_trusted_fast_path() {
        // "/users" and the skip variant of "/users/:id?" share a trie node.
        let mut table = RouteTable::new();
        table.add(Method::Get, "/users", "list").unwrap();
        table.add(Method::Get, "/users/:id?", "maybe").unwrap();
        let (chain, _) = lookup(&table, Method::Get, "/users").unwrap();
        assert_eq!(chain, vec!["list", "maybe"]);
    }

    #[test]
    fn unknown_method_has_no_routes() {
        let table = table(TableConfig::default());
        assert!(!table.has_method(Method::Patch));
        assert!(table.find(Method::Patch, "/users").is_none());
    }
}
