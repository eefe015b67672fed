use crate::router::path::{Segment, WILDCARD, expand_optional, strip_root};
use crate::router::table::{Params, RouteError};
use fnv::FnvBuildHasher;
use std::collections::HashMap;

/// A node in the segment tree.
///
/// # Behavior
/// Each node can hold:
/// - literal children keyed by their exact segment text
/// - at most one parameter child, carrying the parameter name
/// - at most one wildcard child, which is always a leaf
/// - the ordered items registered for the pattern ending at this node
struct TrieNode<T> {
    literals: HashMap<String, TrieNode<T>, FnvBuildHasher>,
    param: Option<(String, Box<TrieNode<T>>)>,
    wildcard: Option<Box<TrieNode<T>>>,
    routes: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            literals: HashMap::with_hasher(FnvBuildHasher::default()),
            param: None,
            wildcard: None,
            routes: Vec::new(),
        }
    }
}

/// Prefix tree matcher for a single HTTP method.
///
/// This is the correctness reference for the route table: every route lands here,
/// whatever its shape. Matching walks one segment at a time, preferring literal
/// edges over the parameter edge over the wildcard edge, and backtracks when a
/// preferred edge dead-ends.
pub struct TrieMatcher<T> {
    root: TrieNode<T>,
    routes: usize,
}

impl<T> Default for TrieMatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrieMatcher<T> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
            routes: 0,
        }
    }

    /// Number of items registered, counting every optional expansion.
    pub fn len(&self) -> usize {
        self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    /// Verifies that `segments` can be inserted without a parameter-name conflict.
    ///
    /// Does not modify the tree.
    fn check(&self, pattern: &str, segments: &[Segment]) -> Result<(), RouteError> {
        let mut node = &self.root;
        for segment in segments {
            node = match segment {
                Segment::Literal(text) => match node.literals.get(text) {
                    Some(child) => child,
                    None => return Ok(()),
                },
                Segment::Param(name) | Segment::OptionalParam(name) => match &node.param {
                    Some((existing, _)) if existing != name => {
                        return Err(RouteError::ambiguous(pattern, existing, name));
                    }
                    Some((_, child)) => child.as_ref(),
                    None => return Ok(()),
                },
                Segment::Wildcard => return Ok(()),
            };
        }
        Ok(())
    }

    fn insert_variant(&mut self, segments: &[Segment], item: T) {
        let mut node = &mut self.root;
        for segment in segments {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::Param(name) | Segment::OptionalParam(name) => node
                    .param
                    .get_or_insert_with(|| (name.clone(), Box::default()))
                    .1
                    .as_mut(),
                Segment::Wildcard => node.wildcard.get_or_insert_with(Box::default).as_mut(),
            };
        }
        node.routes.push(item);
        self.routes += 1;
    }

    /// Inserts `item` under the compiled `segments` of `pattern`.
    ///
    /// # Behavior
    /// Trailing optional parameters register the item at every node the pattern can
    /// end on. All variants are checked before any is inserted, so a conflicting
    /// route leaves the tree unchanged.
    ///
    /// # Errors
    /// `RouteError::AmbiguousRoute` when a differently named parameter already owns
    /// the parameter edge at the same position.
    pub fn insert(&mut self, pattern: &str, segments: &[Segment], item: T) -> Result<(), RouteError>
    where
        T: Clone,
    {
        let variants = expand_optional(segments);
        for variant in &variants {
            self.check(pattern, variant)?;
        }
        let last = variants.len() - 1;
        for (index, variant) in variants.iter().enumerate() {
            log::trace!("Inserting trie variant of '{pattern}' ({}/{})", index + 1, last + 1);
            if index == last {
                self.insert_variant(variant, item);
                break;
            }
            self.insert_variant(variant, item.clone());
        }
        Ok(())
    }

    /// Finds the items registered for `path` along with the bound parameters.
    ///
    /// Returns `None` when nothing matches or the path is not absolute.
    pub fn find<'t>(&'t self, path: &str) -> Option<(&'t [T], Params)> {
        let rest = strip_root(path)?;
        let mut bindings: Vec<(&'t str, &str)> = Vec::new();
        let node = Self::descend(&self.root, Some(rest), &mut bindings)?;
        Some((node.routes.as_slice(), Params::from_pairs(bindings)))
    }

    fn descend<'t, 'p>(
        node: &'t TrieNode<T>,
        remaining: Option<&'p str>,
        bindings: &mut Vec<(&'t str, &'p str)>,
    ) -> Option<&'t TrieNode<T>> {
        let Some(rest) = remaining else {
            if !node.routes.is_empty() {
                return Some(node);
            }
            // A trailing wildcard also matches an empty remainder.
            let wildcard = node.wildcard.as_deref()?;
            if wildcard.routes.is_empty() {
                return None;
            }
            bindings.push((WILDCARD, ""));
            return Some(wildcard);
        };

        let (segment, tail) = match rest.split_once('/') {
            Some((segment, tail)) => (segment, Some(tail)),
            None => (rest, None),
        };

        if let Some(child) = node.literals.get(segment) {
            if let Some(found) = Self::descend(child, tail, bindings) {
                return Some(found);
            }
        }

        if let Some((name, child)) = &node.param {
            if !segment.is_empty() {
                let mark = bindings.len();
                bindings.push((name.as_str(), segment));
                if let Some(found) = Self::descend(child, tail, bindings) {
                    return Some(found);
                }
                bindings.truncate(mark);
            }
        }

        if let Some(wildcard) = node.wildcard.as_deref() {
            if !wildcard.routes.is_empty() {
                bindings.push((WILDCARD, rest));
                return Some(wildcard);
            }
        }

        None
    }
}
