use crate::exchange::RequestContext;
use crate::handler::{Handler, HandlerId, SharedHandler};
use dashmap::{DashMap, Entry};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during handler registry operations.
#[derive(Error, Debug)]
pub enum HandlerRegistryError {
    /// No handler is registered under the requested id.
    #[error("Handler with id '{handler_id}' not found.")]
    MissingHandler { handler_id: HandlerId },

    /// A handler is already registered under the id being registered.
    #[error("Handler with id '{handler_id}' already exists.")]
    ConflictingHandlerId { handler_id: HandlerId },
}

impl HandlerRegistryError {
    /// Creates a `MissingHandler` error for `id`.
    #[inline]
    pub(crate) const fn missing_handler(id: HandlerId) -> Self {
        Self::MissingHandler { handler_id: id }
    }

    /// Creates a `ConflictingHandlerId` error for `id`.
    #[inline]
    pub(crate) const fn conflicting_handler_id(id: HandlerId) -> Self {
        Self::ConflictingHandlerId { handler_id: id }
    }
}

/// Named handlers that a [`RouterConfig`](crate::router::config::RouterConfig)
/// refers to by id.
pub struct HandlerRegistry<C>
where
    C: RequestContext,
{
    handlers: DashMap<HandlerId, SharedHandler<C>, fnv::FnvBuildHasher>,
}

impl<C> Default for HandlerRegistry<C>
where
    C: RequestContext,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> HandlerRegistry<C>
where
    C: RequestContext,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::with_hasher(fnv::FnvBuildHasher::default()),
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Looks up a handler by id.
    ///
    /// # Returns
    /// A shared reference to the handler, or `MissingHandler`.
    pub fn find_with_id(&self, id: &HandlerId) -> Result<SharedHandler<C>, HandlerRegistryError> {
        match self.handlers.get(id) {
            None => Err(HandlerRegistryError::missing_handler(id.clone())),
            Some(handler) => Ok(handler.value().clone()),
        }
    }

    /// Registers `handler` under `handler_id`. Ids are unique; the first
    /// registration wins and later ones fail with `ConflictingHandlerId`.
    pub fn register_handler(
        &mut self,
        handler_id: HandlerId,
        handler: impl Handler<C> + 'static,
    ) -> Result<(), HandlerRegistryError> {
        match self.handlers.entry(handler_id.clone()) {
            Entry::Occupied(_) => Err(HandlerRegistryError::conflicting_handler_id(handler_id)),
            Entry::Vacant(entry) => {
                log::debug!("Registered handler '{}'", handler_id);
                entry.insert(Arc::new(handler));
                Ok(())
            }
        }
    }
}
