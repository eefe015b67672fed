use crate::exchange::RequestContext;
use crate::handler::{DispatchError, ErrorHandler, Handler, HandlerResult};
use crate::router::route::{ChainEntry, Scope};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks how often one frame invoked its continuation.
#[derive(Default)]
struct FrameGuard {
    called: AtomicBool,
    repeated: AtomicBool,
}

impl FrameGuard {
    fn enter(&self) -> bool {
        if self.called.swap(true, Ordering::AcqRel) {
            self.repeated.store(true, Ordering::Release);
            false
        } else {
            true
        }
    }

    fn repeated(&self) -> bool {
        self.repeated.load(Ordering::Acquire)
    }
}

/// The continuation handed to a handler.
///
/// `run` dispatches the rest of the chain. It may be awaited at most once per
/// frame; a second call returns [`DispatchError::DoubleNext`] and the frame is
/// failed with the same error even if the handler swallows it.
pub struct Next<'a, C>
where
    C: RequestContext,
{
    continuation: Option<(&'a Composer<'a, C>, usize)>,
    guard: &'a FrameGuard,
}

impl<'a, C> Next<'a, C>
where
    C: RequestContext,
{
    pub async fn run(&self, ctx: &mut C) -> HandlerResult {
        if !self.guard.enter() {
            return Err(DispatchError::DoubleNext);
        }
        match self.continuation {
            Some((composer, index)) => composer.dispatch(ctx, index).await,
            None => Ok(()),
        }
    }
}

/// Runs router middleware (`head`) followed by a matched chain (`tail`) as
/// one continuation sequence.
pub(crate) struct Composer<'a, C>
where
    C: RequestContext,
{
    head: &'a [ChainEntry<C>],
    tail: &'a [ChainEntry<C>],
    not_found: Option<&'a dyn Handler<C>>,
    on_error: Option<&'a dyn ErrorHandler<C>>,
}

impl<'a, C> Composer<'a, C>
where
    C: RequestContext,
{
    pub(crate) fn new(
        head: &'a [ChainEntry<C>],
        tail: &'a [ChainEntry<C>],
        not_found: Option<&'a dyn Handler<C>>,
        on_error: Option<&'a dyn ErrorHandler<C>>,
    ) -> Self {
        Self {
            head,
            tail,
            not_found,
            on_error,
        }
    }

    fn entry(&self, index: usize) -> Option<&'a ChainEntry<C>> {
        if index < self.head.len() {
            self.head.get(index)
        } else {
            self.tail.get(index - self.head.len())
        }
    }

    /// Scope of the matched route, if it was contributed by a mounted router.
    fn route_scope(&self) -> Option<&'a Scope<C>> {
        self.tail.last().and_then(|entry| entry.scope())
    }

    /// Invokes frame `index`.
    ///
    /// # Behavior
    /// - An aborted context ends the sequence with `Ok(())`.
    /// - Past the last entry the not-found handler runs (route scope first,
    ///   then the router's); with neither the context is left untouched.
    /// - Errors and panics are offered to the error handler of the frame's
    ///   scope, then the router's. Without one they propagate.
    pub(crate) fn dispatch<'s>(&'s self, ctx: &'s mut C, index: usize) -> BoxFuture<'s, HandlerResult> {
        Box::pin(async move {
            if ctx.is_aborted() {
                log::trace!("Context aborted, skipping frame {}", index);
                return Ok(());
            }
            match self.entry(index) {
                Some(entry) => {
                    log::trace!(
                        "Dispatching frame {} to '{}' ({})",
                        index,
                        entry.handler.name(),
                        entry.meta
                    );
                    self.invoke(entry.handler.as_ref(), entry.scope(), ctx, Some(index + 1))
                        .await
                }
                None => {
                    let scope = self.route_scope();
                    let fallback = scope
                        .and_then(|scope| scope.not_found.as_deref())
                        .or(self.not_found);
                    match fallback {
                        Some(handler) => {
                            log::debug!("No handler completed '{}', running not-found", ctx.path());
                            self.invoke(handler, scope, ctx, None).await
                        }
                        None => Ok(()),
                    }
                }
            }
        })
    }

    async fn invoke(
        &self,
        handler: &dyn Handler<C>,
        scope: Option<&Scope<C>>,
        ctx: &mut C,
        continuation: Option<usize>,
    ) -> HandlerResult {
        let guard = FrameGuard::default();
        let next = Next {
            continuation: continuation.map(|index| (self, index)),
            guard: &guard,
        };
        let outcome = AssertUnwindSafe(handler.handle(ctx, next))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(())) if guard.repeated() => Err(DispatchError::DoubleNext),
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("Handler '{}' panicked: {}", handler.name(), message);
                Err(DispatchError::panicked(message))
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err @ DispatchError::ErrorHandler { .. }) => Err(err),
            Err(err) => self.recover(scope, err, ctx).await,
        }
    }

    async fn recover(&self, scope: Option<&Scope<C>>, err: DispatchError, ctx: &mut C) -> HandlerResult {
        let error_handler = scope
            .and_then(|scope| scope.on_error.as_deref())
            .or(self.on_error);
        let Some(error_handler) = error_handler else {
            log::debug!("No error handler for '{}', propagating: {}", ctx.path(), err);
            return Err(err);
        };
        log::debug!("Handing error to error handler: {}", err);
        match AssertUnwindSafe(error_handler.handle_error(err, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(DispatchError::error_handler(err)),
            Err(payload) => Err(DispatchError::error_handler(DispatchError::panicked(
                panic_message(payload.as_ref()),
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
