use crate::exchange::RequestContext;
use crate::handler::{SharedErrorHandler, SharedHandler};
use crate::router::method::Method;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Where a chain entry came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    /// `None` for router-wide middleware.
    pub method: Option<Method>,
    pub pattern: String,
    /// Prefix of the router the entry was first registered on.
    pub base_path: String,
}

impl RouteMeta {
    pub fn new(method: Option<Method>, pattern: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            base_path: base_path.into(),
        }
    }
}

impl Display for RouteMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.method {
            Some(method) => write!(f, "{} {}", method, self.pattern),
            None => write!(f, "* {}", self.pattern),
        }
    }
}

/// Error and not-found handlers of a mounted router. They take precedence over
/// the mounting router's own for the routes the mounted router contributed.
pub struct Scope<C>
where
    C: RequestContext,
{
    pub on_error: Option<SharedErrorHandler<C>>,
    pub not_found: Option<SharedHandler<C>>,
}

impl<C> Scope<C>
where
    C: RequestContext,
{
    pub fn is_empty(&self) -> bool {
        self.on_error.is_none() && self.not_found.is_none()
    }
}

/// One handler in a matched chain, together with its route record.
pub struct ChainEntry<C>
where
    C: RequestContext,
{
    pub handler: SharedHandler<C>,
    pub meta: Arc<RouteMeta>,
    pub scope: Option<Arc<Scope<C>>>,
}

impl<C> ChainEntry<C>
where
    C: RequestContext,
{
    pub fn new(handler: SharedHandler<C>, meta: Arc<RouteMeta>) -> Self {
        Self {
            handler,
            meta,
            scope: None,
        }
    }

    pub(crate) fn with_scope(mut self, scope: Option<Arc<Scope<C>>>) -> Self {
        self.scope = scope;
        self
    }

    pub(crate) fn scope(&self) -> Option<&Scope<C>> {
        self.scope.as_deref()
    }
}

impl<C> Clone for ChainEntry<C>
where
    C: RequestContext,
{
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            meta: Arc::clone(&self.meta),
            scope: self.scope.clone(),
        }
    }
}

impl<C> Debug for ChainEntry<C>
where
    C: RequestContext,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("handler", &self.handler.name())
            .field("route", &self.meta.to_string())
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}
