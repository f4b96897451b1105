//! Per-request context: the state bag every middleware receives.
//!
//! A [`RequestContext`] owns exactly one [`Request`] and one [`Response`] for
//! its lifetime, plus:
//!
//! - [`Extensions`] — a type-keyed item bag for passing data (a principal, a
//!   start timestamp, a counter) between middleware without coupling them;
//! - a [`RequestId`] used to correlate log records;
//! - a [`CancellationToken`] fed by the transport or the executor;
//! - a `completed` flag set once the response is final.
//!
//! The context is always passed explicitly as `&mut RequestContext`; nothing in
//! the crate reads it from thread-local or global state.

pub mod cancel;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use uuid::Uuid;

use crate::http::{Request, Response};
use cancel::CancellationToken;

/// Type-erased request extensions map — used to inject per-request state
/// into middleware without requiring them to know about each other's types.
///
/// Keys are types: a later [`insert`](Self::insert) of the same type overwrites
/// the earlier value.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, returning the previous value of the same type if any
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to a value from the extensions map
    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Get a mutable reference, inserting `T::default()` first if absent
    pub fn get_or_default<T>(&mut self) -> &mut T
    where
        T: Default + Send + Sync + 'static,
    {
        let slot = self
            .map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            // The entry is keyed by TypeId::of::<T>(), so the downcast holds.
            None => unreachable!("extension stored under a foreign TypeId"),
        }
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Returns `true` if a value of type `T` is present
    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Correlation id of one request, carried through every log record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Header the id is read from and echoed back in.
    pub const HEADER: &'static str = "X-Request-Id";

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuses the caller's `X-Request-Id` if present and sane, otherwise generates one.
    pub fn from_request(request: &Request) -> Self {
        match request.headers().get(Self::HEADER) {
            Some(id) if is_valid_id(id) => Self(id.to_owned()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Per-request state shared by every middleware of one execution.
pub struct RequestContext {
    request: Request,
    response: Response,
    items: Extensions,
    request_id: RequestId,
    cancellation: CancellationToken,
    completed: bool,
}

impl RequestContext {
    /// Creates a context with a fresh response and a token that never fires.
    pub fn new(request: Request) -> Self {
        Self::with_cancellation(request, CancellationToken::never())
    }

    /// Creates a context observing the given cancellation token.
    pub fn with_cancellation(request: Request, cancellation: CancellationToken) -> Self {
        let request_id = RequestId::from_request(&request);
        Self {
            request,
            response: Response::new(),
            items: Extensions::new(),
            request_id,
            cancellation,
            completed: false,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn items(&self) -> &Extensions {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Extensions {
        &mut self.items
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `self.cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Marks the response as final and flushes its headers.
    ///
    /// Continuing the chain or writing more body chunks after this is a
    /// protocol violation.
    pub fn complete(&mut self) {
        self.response.finish();
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Splits the context into the request and the response it wraps.
    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", self.request.method())
            .field("path", &self.request.path())
            .field("status", &self.response.status())
            .field("items", &self.items)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    #[derive(Debug, PartialEq)]
    struct Principal(&'static str);

    #[test]
    fn extensions_overwrite_by_type() {
        let mut ext = Extensions::new();
        assert_eq!(ext.insert(Principal("alice")), None);
        assert_eq!(ext.insert(Principal("bob")), Some(Principal("alice")));
        assert_eq!(ext.get::<Principal>(), Some(&Principal("bob")));
        assert_eq!(ext.len(), 1);
    }

    #[test]
    fn extensions_get_or_default() {
        let mut ext = Extensions::new();
        *ext.get_or_default::<u32>() += 2;
        *ext.get_or_default::<u32>() += 3;
        assert_eq!(ext.get::<u32>(), Some(&5));
        assert_eq!(ext.remove::<u32>(), Some(5));
        assert!(!ext.contains::<u32>());
    }

    #[test]
    fn request_id_is_propagated_when_valid() {
        let req = Request::builder().header("x-request-id", "abc-123").build();
        assert_eq!(RequestId::from_request(&req).as_str(), "abc-123");

        let req = Request::builder().header("x-request-id", "bad id\n").build();
        assert_ne!(RequestId::from_request(&req).as_str(), "bad id\n");
    }

    #[test]
    fn complete_starts_the_response() {
        let mut ctx = RequestContext::new(Request::builder().build());
        ctx.response_mut().set_status(StatusCode::Accepted).unwrap();
        ctx.complete();
        assert!(ctx.is_completed());
        assert!(ctx.response().has_started());
        assert!(!ctx.is_cancelled());
    }
}
