use crate::router::path::{Segment, render};
use crate::router::table::Params;
use fnv::FnvBuildHasher;
use once_cell::sync::OnceCell;
use regex::{Regex, escape};
use std::collections::HashMap;

/// `.` matches `\n` and `$` only matches at the end of the path.
const REGEX_FLAGS: &str = "(?s-m)";

/// Default upper bound on capture groups in one composite regex.
pub const DEFAULT_MAX_GROUPS: usize = 20;

/// One registered pattern, rendered as an alternative of a composite regex.
struct Fragment<T> {
    source: String,
    rank: Vec<u8>,
    names: Vec<String>,
    regex: String,
    items: Vec<T>,
}

impl<T> Fragment<T> {
    /// Capture groups this fragment needs: one marker plus one per parameter.
    fn groups(&self) -> usize {
        1 + self.names.len()
    }
}

struct BatchRoute {
    marker: usize,
    fragment: usize,
    trusted: bool,
}

struct Batch {
    regex: Regex,
    routes: Vec<BatchRoute>,
}

/// Outcome of a fast-path lookup.
pub enum FastMatch<'t, T> {
    /// A route matched. `trusted` is false when a route only the trie knows about
    /// could outrank it.
    Hit {
        items: &'t [T],
        params: Params,
        trusted: bool,
    },
    /// No composite regex matched.
    Miss,
    /// The fast path was never built or failed to compile.
    Unavailable,
}

/// Composite-regex matcher for a single HTTP method.
///
/// # Behavior
/// Routes are collected while the table is open. On `build` they are ordered by the
/// same priority the trie applies (literal before parameter before wildcard, segment
/// by segment, a pattern that ends sorting before any longer one) and packed into
/// anchored alternations of at most `max_groups` capture groups. Because the regex
/// engine prefers earlier alternatives, the first matching alternative is the route
/// the trie would have chosen.
///
/// Patterns with optional parameters, and patterns needing more groups than one
/// batch allows, are left to the trie. Their ranks are kept so a fast-path hit that
/// one of them could outrank is reported as untrusted.
pub struct CompiledMatcher<T> {
    max_groups: usize,
    fragments: Vec<Fragment<T>>,
    index: HashMap<String, usize, FnvBuildHasher>,
    excluded: Vec<Vec<u8>>,
    batches: OnceCell<Option<Vec<Batch>>>,
}

impl<T> CompiledMatcher<T> {
    pub fn new(max_groups: usize) -> Self {
        Self {
            max_groups: max_groups.max(2),
            fragments: Vec::new(),
            index: HashMap::with_hasher(FnvBuildHasher::default()),
            excluded: Vec::new(),
            batches: OnceCell::new(),
        }
    }

    /// True when every route offered so far is representable here.
    pub fn is_total(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Number of distinct patterns folded into composite regexes.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Offers a compiled route to the fast path.
    ///
    /// # Returns
    /// `true` when the route was folded in, `false` when only the trie can serve it.
    /// Repeated patterns append to the existing fragment, keeping registration order.
    pub fn insert(&mut self, segments: &[Segment], item: T) -> bool {
        if segments
            .iter()
            .any(|segment| matches!(segment, Segment::OptionalParam(_)))
        {
            for variant in crate::router::path::expand_optional(segments) {
                self.excluded.push(rank_of(&variant));
            }
            return false;
        }

        let source = render(segments);
        if let Some(&position) = self.index.get(&source) {
            self.fragments[position].items.push(item);
            return true;
        }

        let names: Vec<String> = segments
            .iter()
            .filter_map(|segment| segment.param_name().map(str::to_string))
            .collect();
        if 1 + names.len() > self.max_groups {
            log::debug!(
                "'{source}' needs {} capture groups, over the limit of {}",
                1 + names.len(),
                self.max_groups
            );
            self.excluded.push(rank_of(segments));
            return false;
        }

        self.index.insert(source.clone(), self.fragments.len());
        self.fragments.push(Fragment {
            rank: rank_of(segments),
            regex: fragment_regex(segments),
            source,
            names,
            items: vec![item],
        });
        true
    }

    /// Compiles the composite regexes. Idempotent.
    ///
    /// # Returns
    /// `false` when a composite regex could not be compiled, in which case the fast
    /// path stays unavailable and lookups must go to the trie.
    pub fn build(&self) -> bool {
        self.batches.get_or_init(|| self.compile()).is_some()
    }

    fn compile(&self) -> Option<Vec<Batch>> {
        let mut order: Vec<usize> = (0..self.fragments.len()).collect();
        // Stable, so equal ranks keep registration order.
        order.sort_by(|a, b| self.fragments[*a].rank.cmp(&self.fragments[*b].rank));

        let mut batches = Vec::new();
        let mut alternatives: Vec<&str> = Vec::new();
        let mut routes: Vec<BatchRoute> = Vec::new();
        let mut groups = 0;

        for position in order {
            let fragment = &self.fragments[position];
            if groups + fragment.groups() > self.max_groups {
                batches.push(Self::compile_batch(&alternatives, std::mem::take(&mut routes))?);
                alternatives.clear();
                groups = 0;
            }
            routes.push(BatchRoute {
                marker: groups + 1,
                fragment: position,
                trusted: self.excluded.iter().all(|rank| fragment.rank < *rank),
            });
            alternatives.push(&fragment.regex);
            groups += fragment.groups();
        }
        if !routes.is_empty() {
            batches.push(Self::compile_batch(&alternatives, routes)?);
        }

        log::debug!(
            "Folded {} patterns into {} composite regexes",
            self.fragments.len(),
            batches.len()
        );
        Some(batches)
    }

    fn compile_batch(alternatives: &[&str], routes: Vec<BatchRoute>) -> Option<Batch> {
        let body = alternatives
            .iter()
            .map(|alternative| format!("({alternative})$"))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("{REGEX_FLAGS}^(?:{body})");
        match Regex::new(&pattern) {
            Ok(regex) => Some(Batch { regex, routes }),
            Err(e) => {
                log::warn!("Composite route regex failed to compile, using the trie only: {e}");
                None
            }
        }
    }

    /// Looks `path` up in the composite regexes, in priority order.
    pub fn find<'t>(&'t self, path: &str) -> FastMatch<'t, T> {
        let Some(Some(batches)) = self.batches.get() else {
            return FastMatch::Unavailable;
        };
        let path = if path.is_empty() { "/" } else { path };
        if !path.starts_with('/') {
            return FastMatch::Miss;
        }

        for batch in batches {
            let Some(captures) = batch.regex.captures(path) else {
                continue;
            };
            let Some(route) = batch
                .routes
                .iter()
                .find(|route| captures.get(route.marker).is_some())
            else {
                continue;
            };
            let fragment = &self.fragments[route.fragment];
            log::trace!("Fast path matched '{path}' to '{}'", fragment.source);
            let params = Params::from_pairs(fragment.names.iter().enumerate().map(
                |(offset, name)| {
                    let value = captures
                        .get(route.marker + 1 + offset)
                        .map_or("", |group| group.as_str());
                    (name.as_str(), value)
                },
            ));
            return FastMatch::Hit {
                items: &fragment.items,
                params,
                trusted: route.trusted,
            };
        }
        FastMatch::Miss
    }
}

/// Priority key of a concrete (optional-free) segment list.
fn rank_of(segments: &[Segment]) -> Vec<u8> {
    segments.iter().map(Segment::rank).collect()
}

fn fragment_regex(segments: &[Segment]) -> String {
    let mut regex = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                regex.push('/');
                regex.push_str(&escape(text));
            }
            Segment::Param(_) | Segment::OptionalParam(_) => regex.push_str("/([^/]+)"),
            Segment::Wildcard => regex.push_str("(?:/(.*))?"),
        }
    }
    regex
}
