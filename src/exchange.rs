use crate::router::table::Params;
use crate::status::ExchangeState;
use fnv::FnvHasher;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// What the dispatcher needs from a per-request context.
///
/// # Behavior
/// The router reads `method` and `path` to find a chain, stores the bound
/// parameters with `set_params`, and stops invoking frames once
/// `is_aborted` reports `true`. Everything else about the request (headers,
/// body, status) belongs to the implementor.
pub trait RequestContext: Send {
    fn method(&self) -> &str;

    /// Request path without the query string.
    fn path(&self) -> &str;

    fn params(&self) -> &Params;

    fn set_params(&mut self, params: Params);

    fn is_completed(&self) -> bool {
        false
    }

    fn is_aborted(&self) -> bool {
        false
    }
}

type AbortCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    callbacks: Mutex<Vec<AbortCallback>>,
}

/// Cancellation flag shared between a transport and the request it serves.
///
/// Clones observe the same flag. Callbacks registered with
/// [`on_abort`](AbortSignal::on_abort) run once, on the thread that aborts.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortState>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Flips the flag and drains the registered callbacks. Later calls do nothing.
    pub fn abort(&self) {
        if self.inner.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        log::debug!("Abort signalled, running {} callback(s)", callbacks.len());
        for callback in callbacks {
            callback();
        }
    }

    /// Registers cleanup to run on abort. Runs immediately when already aborted.
    pub fn on_abort(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.is_aborted() {
                guard.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

impl Debug for AbortSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// The default [`RequestContext`]: a request line, bound parameters, and
/// input/output slots for whatever body types the application uses.
///
/// # Type Parameters
/// - `I`: input data type
/// - `O`: output data type
pub struct Exchange<I, O>
where
    I: Send,
    O: Send,
{
    uuid: Uuid,
    method: String,
    path: String,
    params: Params,
    input: Option<I>,
    output: Option<O>,
    state: ExchangeState,
    abort: AbortSignal,
    attachments: Attachments,
}

impl<I, O> Exchange<I, O>
where
    I: Send,
    O: Send,
{
    /// Creates an exchange for `method path` with a random V4 UUID.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new_with_uuid(Uuid::new_v4(), method, path)
    }

    pub fn new_with_uuid(uuid: Uuid, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uuid,
            method: method.into(),
            path: path.into(),
            params: Params::new(),
            input: None,
            output: None,
            state: ExchangeState::IN_FLIGHT,
            abort: AbortSignal::new(),
            attachments: Attachments::new(),
        }
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn state(&self) -> ExchangeState {
        if self.abort.is_aborted() {
            self.state | ExchangeState::ABORTED
        } else {
            self.state
        }
    }

    /// Marks the exchange completed.
    ///
    /// # Errors
    /// Returns `ExchangeError::Completed` when it already was.
    pub fn complete(&mut self) -> Result<(), ExchangeError> {
        if self.state.is_complete() {
            return Err(ExchangeError::exchange_completed(&self.uuid));
        }
        self.state |= ExchangeState::COMPLETED;
        Ok(())
    }

    pub fn mark(&mut self, flags: ExchangeState) {
        self.state |= flags;
    }

    /// A handle the transport keeps to cancel this exchange.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut Attachments {
        &mut self.attachments
    }

    pub fn set_input(&mut self, input: I) {
        self.input = Some(input);
    }

    pub fn input(&self) -> Option<&I> {
        self.input.as_ref()
    }

    pub fn take_input(&mut self) -> Result<I, ExchangeError> {
        self.input
            .take()
            .ok_or_else(|| ExchangeError::take_error(&self.uuid, "No input available to take"))
    }

    pub fn set_output(&mut self, output: O) {
        self.output = Some(output);
    }

    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut O> {
        self.output.as_mut()
    }

    pub fn take_output(&mut self) -> Result<O, ExchangeError> {
        self.output
            .take()
            .ok_or_else(|| ExchangeError::take_error(&self.uuid, "No output available to take"))
    }
}

impl<I, O> RequestContext for Exchange<I, O>
where
    I: Send,
    O: Send,
{
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    fn is_completed(&self) -> bool {
        self.state.is_complete()
    }

    fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Typed values keyed by name, for handlers to hand data downstream.
pub struct Attachments {
    values: HashMap<AttachmentKey, Box<dyn Any + Send>, fnv::FnvBuildHasher>,
}

impl Default for Attachments {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachments {
    pub fn new() -> Self {
        Self {
            values: HashMap::with_hasher(fnv::FnvBuildHasher::default()),
        }
    }

    /// Stores `value` under `key`. The same key may hold one value per type.
    pub fn add<K>(&mut self, key: impl AsRef<str>, value: K)
    where
        K: Send + 'static,
    {
        self.values
            .insert(AttachmentKey::new::<K>(key), Box::new(value));
    }

    pub fn get<K>(&self, key: impl AsRef<str>) -> Option<&K>
    where
        K: Send + 'static,
    {
        self.values
            .get(&AttachmentKey::new::<K>(key))
            .and_then(|value| value.downcast_ref::<K>())
    }

    pub fn remove<K>(&mut self, key: impl AsRef<str>) -> Option<K>
    where
        K: Send + 'static,
    {
        self.values
            .remove(&AttachmentKey::new::<K>(key))
            .and_then(|value| value.downcast::<K>().ok())
            .map(|value| *value)
    }
}

#[derive(PartialEq, Eq, Hash)]
struct AttachmentKey {
    key_hash: u64,
    type_id: TypeId,
}

impl AttachmentKey {
    fn new<K: 'static>(key: impl AsRef<str>) -> Self {
        let mut hasher = FnvHasher::default();
        key.as_ref().hash(&mut hasher);
        Self {
            key_hash: hasher.finish(),
            type_id: TypeId::of::<K>(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Exchange '{uuid}' has already been completed")]
    Completed { uuid: Uuid },

    #[error("Take error occurred for exchange '{uuid}'. {message}")]
    Take { uuid: Uuid, message: String },
}

impl ExchangeError {
    #[inline]
    pub const fn exchange_completed(uuid: &Uuid) -> Self {
        ExchangeError::Completed { uuid: *uuid }
    }

    #[inline]
    pub(crate) fn take_error(uuid: &Uuid, msg: impl Into<String>) -> Self {
        ExchangeError::Take {
            uuid: *uuid,
            message: msg.into(),
        }
    }
}
