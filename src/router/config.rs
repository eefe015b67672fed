use crate::handler::config::Executable;
use crate::router::method::Method;
use crate::router::path::compiled::DEFAULT_MAX_GROUPS;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Matching strategy settings for a route table.
///
/// # Structure
/// ```json
/// { "fast_path": true, "max_capture_groups": 20 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Build the composite-regex accelerator. With `false` every lookup walks the trie.
    #[serde(default = "default_fast_path")]
    pub fast_path: bool,

    /// Capture groups allowed in one composite regex. Values below 2 are raised to 2.
    #[serde(default = "default_max_capture_groups")]
    pub max_capture_groups: usize,
}

fn default_fast_path() -> bool {
    true
}

fn default_max_capture_groups() -> usize {
    DEFAULT_MAX_GROUPS
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            fast_path: default_fast_path(),
            max_capture_groups: default_max_capture_groups(),
        }
    }
}

/// Declarative router definition, resolved against a handler registry.
///
/// # Structure
/// ```json
/// {
///   "table": { "fast_path": true },
///   "chains": { "secured": ["auth", "audit"] },
///   "routes": {
///     "/users/:id": { "GET": ["@secured", "show_user"] }
///   }
/// }
/// ```
/// Executables starting with `@` refer to a named chain; anything else is a
/// handler id. Routes are registered in pattern order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub chains: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub routes: BTreeMap<String, BTreeMap<Method, Vec<String>>>,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableConfig) -> Self {
        self.table = table;
        self
    }

    pub fn chain(mut self, name: impl Into<String>, handlers: &[impl AsRef<str>]) -> Self {
        self.chains.insert(
            name.into(),
            handlers.iter().map(|h| h.as_ref().to_string()).collect(),
        );
        self
    }

    pub fn route(
        mut self,
        pattern: impl Into<String>,
        method: Method,
        executables: &[impl AsRef<str>],
    ) -> Self {
        self.routes.entry(pattern.into()).or_default().insert(
            method,
            executables.iter().map(|e| e.as_ref().to_string()).collect(),
        );
        self
    }

    /// Expands `@chain` references into the handler names they stand for.
    ///
    /// # Returns
    /// `Err` with the chain name when a referenced chain is not defined.
    pub fn resolve(&self, executables: &[String]) -> Result<Vec<String>, String> {
        let mut handlers = Vec::new();
        for raw in executables {
            match raw.parse::<Executable>() {
                Ok(Executable::Handler(name)) => handlers.push(name),
                Ok(Executable::Chain(name)) => match self.chains.get(&name) {
                    Some(chain) => handlers.extend(chain.iter().cloned()),
                    None => return Err(name),
                },
                Err(never) => match never {},
            }
        }
        Ok(handlers)
    }
}
