pub mod config;
pub mod registry;

use crate::exchange::RequestContext;
use crate::router::executor::Next;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

pub use config::HandlerId;

pub type SharedHandler<C> = Arc<dyn Handler<C>>;
pub type SharedErrorHandler<C> = Arc<dyn ErrorHandler<C>>;
pub type HandlerResult = Result<(), DispatchError>;

/// A middleware or terminal handler in a dispatch chain.
///
/// # Behavior
/// A handler either finishes the request itself (by returning without calling
/// `next`), passes control downstream with `next.run(ctx).await`, or does both:
/// code after the `next` call runs once every downstream frame has returned.
/// Calling `next` twice from one frame fails with [`DispatchError::DoubleNext`].
#[async_trait]
pub trait Handler<C>: Send + Sync
where
    C: RequestContext,
{
    async fn handle(&self, ctx: &mut C, next: Next<'_, C>) -> HandlerResult;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Receives errors and panics raised by handlers.
///
/// Returning `Ok` marks the error as recovered. An error returned from here is
/// surfaced to the caller of the dispatch as [`DispatchError::ErrorHandler`].
#[async_trait]
pub trait ErrorHandler<C>: Send + Sync
where
    C: RequestContext,
{
    async fn handle_error(&self, error: DispatchError, ctx: &mut C) -> HandlerResult;
}

/// Request-time failures raised while running a chain.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("next() called multiple times")]
    DoubleNext,

    #[error("Handler failed.")]
    Handler {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    #[error("Error handler failed.")]
    ErrorHandler {
        #[source]
        source: Box<DispatchError>,
    },
}

impl DispatchError {
    #[inline]
    pub fn handler(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Handler { source: err.into() }
    }

    #[inline]
    pub(crate) fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    #[inline]
    pub(crate) fn error_handler(err: DispatchError) -> Self {
        Self::ErrorHandler {
            source: Box::new(err),
        }
    }
}
