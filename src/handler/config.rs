use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Identifier of a registered handler, keyed by the FNV hash of its name.
#[derive(Debug, Clone)]
pub struct HandlerId {
    name: String,
    handler_hash: u64,
}

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        let name = id.into();
        let mut hasher = fnv::FnvHasher::default();
        name.hash(&mut hasher);
        let handler_hash = hasher.finish();
        Self { name, handler_hash }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for HandlerId {
    fn eq(&self, other: &Self) -> bool {
        self.handler_hash == other.handler_hash && self.name == other.name
    }
}

impl Eq for HandlerId {}

impl Hash for HandlerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.handler_hash);
    }
}

impl Display for HandlerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An entry in a configured route: a single handler or a named chain (`@name`).
#[derive(PartialEq, Debug, Clone)]
pub enum Executable {
    Handler(String),
    Chain(String),
}

impl Display for Executable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Executable::Handler(name) => write!(f, "{}", name),
            Executable::Chain(name) => write!(f, "@{}", name),
        }
    }
}

impl FromStr for Executable {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('@') {
            Some(chain) => Ok(Executable::Chain(chain.to_string())),
            None => Ok(Executable::Handler(s.to_string())),
        }
    }
}
