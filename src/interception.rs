//! Request interception and dialog handling for one browsing context.
//!
//! An [`Interceptor`] registers a single event handler on a [`Connection`]
//! and reacts to two kinds of events addressed to its context:
//!
//! - A blocked `network.beforeRequestSent` is offered to the first route
//!   whose [`UrlPattern`] matches; the route returns a [`RouteDecision`].
//!   Unmatched requests are continued unchanged.
//! - `browsingContext.userPromptOpened` is offered to the dialog handler,
//!   which returns a [`DialogDecision`]. Without one the dialog is
//!   dismissed.
//!
//! Handlers are plain synchronous functions returning a decision. The
//! command carrying the decision is scheduled with
//! [`Connection::send_detached`], never awaited on the dispatch loop.
//!
//! # Example
//!
//! ```no_run
//! use bidi_client::{Connection, DialogDecision, FulfillResponse, Interceptor, RouteDecision};
//!
//! # fn example(connection: &Connection) {
//! let interceptor = Interceptor::attach(connection, "context-1");
//!
//! interceptor.route("**/api/*", |request| {
//!     if request.method == "POST" {
//!         RouteDecision::Abort
//!     } else {
//!         RouteDecision::Fulfill(FulfillResponse::new(200).with_body("{}"))
//!     }
//! });
//!
//! interceptor.on_dialog(|_| DialogDecision::accept());
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};

use crate::client::Connection;
use crate::client::events::panic_message;
use crate::identifiers::{ContextId, HandlerId};
use crate::protocol::{Event, ParsedEvent};

// ============================================================================
// Constants
// ============================================================================

const CONTINUE_METHOD: &str = "vibium:network.continue";
const FULFILL_METHOD: &str = "vibium:network.fulfill";
const ABORT_METHOD: &str = "vibium:network.abort";
const DIALOG_ACCEPT_METHOD: &str = "vibium:dialog.accept";
const DIALOG_DISMISS_METHOD: &str = "vibium:dialog.dismiss";

/// Plain BiDi continue, used for requests no route claims.
const CONTINUE_REQUEST_METHOD: &str = "network.continueRequest";

// ============================================================================
// UrlPattern
// ============================================================================

/// URL matcher for routes.
///
/// - `**` matches every URL
/// - a pattern containing `*` is a glob over the whole URL, where `*`
///   matches any run of characters and `?` exactly one
/// - anything else matches URLs containing it as a substring
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlPattern(String);

impl UrlPattern {
    /// Creates a pattern.
    #[inline]
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Returns the pattern text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `url` matches.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        if self.0 == "**" {
            return true;
        }
        if self.0.contains('*') {
            return glob_match(&self.0, url);
        }
        url.contains(self.0.as_str())
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UrlPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl From<String> for UrlPattern {
    fn from(pattern: String) -> Self {
        Self(pattern)
    }
}

/// Wildcard match with `*` and `?`, anchored at both ends.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// ============================================================================
// Decisions
// ============================================================================

/// Changes applied to a continued request. Unset fields keep the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinueOverrides {
    /// Replacement URL.
    pub url: Option<String>,
    /// Replacement HTTP method.
    pub method: Option<String>,
    /// Replacement headers.
    pub headers: Option<FxHashMap<String, String>>,
    /// Replacement request body.
    pub body: Option<String>,
}

impl ContinueOverrides {
    /// Overrides nothing.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the URL.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the method.
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets one header, keeping others already set here.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(FxHashMap::default)
            .insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A synthetic response served instead of the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillResponse {
    /// HTTP status; the remote end defaults to 200.
    pub status: Option<u16>,
    /// Response headers.
    pub headers: Option<FxHashMap<String, String>>,
    /// `Content-Type` shorthand.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Option<String>,
}

impl FulfillResponse {
    /// Creates a response with `status`.
    #[inline]
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Sets one header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(FxHashMap::default)
            .insert(name.into(), value.into());
        self
    }

    /// Sets the content type.
    #[inline]
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// What to do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Let the request through, optionally modified.
    Continue(ContinueOverrides),
    /// Answer it locally.
    Fulfill(FulfillResponse),
    /// Fail it.
    Abort,
}

impl Default for RouteDecision {
    fn default() -> Self {
        Self::Continue(ContinueOverrides::default())
    }
}

impl RouteDecision {
    /// Command method carrying this decision.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Continue(_) => CONTINUE_METHOD,
            Self::Fulfill(_) => FULFILL_METHOD,
            Self::Abort => ABORT_METHOD,
        }
    }

    /// Builds the command (method and params) applying this decision to the
    /// request `request_id`.
    #[must_use]
    pub fn into_command(self, request_id: &str) -> (&'static str, Value) {
        let method = self.method();
        let mut params = Map::new();
        params.insert("request".to_string(), Value::from(request_id));

        match self {
            Self::Continue(overrides) => {
                insert_some(&mut params, "url", overrides.url);
                insert_some(&mut params, "method", overrides.method);
                insert_headers(&mut params, overrides.headers);
                insert_some(&mut params, "body", overrides.body);
            }
            Self::Fulfill(response) => {
                insert_some(&mut params, "statusCode", response.status);
                insert_headers(&mut params, response.headers);
                insert_some(&mut params, "contentType", response.content_type);
                insert_some(&mut params, "body", response.body);
            }
            Self::Abort => {}
        }

        (method, Value::Object(params))
    }
}

/// What to do with a user prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialogDecision {
    /// Accept, answering a `prompt` dialog with `prompt_text` if set.
    Accept {
        /// Text entered into a `prompt` dialog.
        prompt_text: Option<String>,
    },
    /// Dismiss.
    #[default]
    Dismiss,
}

impl DialogDecision {
    /// Accept without text.
    #[inline]
    #[must_use]
    pub fn accept() -> Self {
        Self::Accept { prompt_text: None }
    }

    /// Accept with prompt text.
    #[inline]
    #[must_use]
    pub fn accept_with(text: impl Into<String>) -> Self {
        Self::Accept {
            prompt_text: Some(text.into()),
        }
    }

    /// Builds the command applying this decision to the dialog in `context`.
    #[must_use]
    pub fn into_command(self, context: &ContextId) -> (&'static str, Value) {
        match self {
            Self::Accept { prompt_text } => {
                let mut params = Map::new();
                params.insert("context".to_string(), Value::from(context.as_str()));
                insert_some(&mut params, "userText", prompt_text);
                (DIALOG_ACCEPT_METHOD, Value::Object(params))
            }
            Self::Dismiss => (DIALOG_DISMISS_METHOD, json!({ "context": context.as_str() })),
        }
    }
}

fn insert_some<T: Into<Value>>(params: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.into());
    }
}

fn insert_headers(params: &mut Map<String, Value>, headers: Option<FxHashMap<String, String>>) {
    if let Some(headers) = headers {
        let headers: Map<String, Value> = headers
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        params.insert("headers".to_string(), Value::Object(headers));
    }
}

// ============================================================================
// Handler Inputs
// ============================================================================

/// A request paused by interception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    /// Remote request id.
    pub request_id: String,
    /// Request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: FxHashMap<String, String>,
}

/// An open user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    /// Context showing the prompt.
    pub context: ContextId,
    /// `alert`, `confirm`, `prompt` or `beforeunload`.
    pub prompt_type: String,
    /// Prompt message.
    pub message: String,
    /// Default value of a `prompt` dialog.
    pub default_value: Option<String>,
}

/// Route callback.
pub type RouteHandler = Arc<dyn Fn(&InterceptedRequest) -> RouteDecision + Send + Sync>;

/// Dialog callback.
pub type DialogHandler = Arc<dyn Fn(&Dialog) -> DialogDecision + Send + Sync>;

// ============================================================================
// Interceptor
// ============================================================================

struct InterceptorInner {
    connection: Connection,
    context: ContextId,
    routes: Mutex<Vec<(UrlPattern, RouteHandler)>>,
    dialog: Mutex<Option<DialogHandler>>,
    handler_id: Mutex<Option<HandlerId>>,
}

impl Drop for InterceptorInner {
    fn drop(&mut self) {
        if let Some(id) = self.handler_id.get_mut().take() {
            self.connection.remove_event_handler(id);
            debug!(context = %self.context, handler = %id, "Interceptor dropped, handler removed");
        }
    }
}

/// Routes and dialog handling for one browsing context.
///
/// Cheap to clone. Stops reacting to events on [`detach`](Self::detach);
/// once every clone is dropped its connection handler is removed.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<InterceptorInner>,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("context", &self.inner.context)
            .field("routes", &self.route_count())
            .field("has_dialog_handler", &self.inner.dialog.lock().is_some())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Interceptor {
    /// Registers an interceptor for `context` on `connection`.
    ///
    /// The interceptor sees events arriving after this call. It does not
    /// take events buffered before the first handler; those are still
    /// replayed to handlers registered with [`Connection::on_event`].
    pub fn attach(connection: &Connection, context: impl Into<ContextId>) -> Self {
        let inner = Arc::new(InterceptorInner {
            connection: connection.clone(),
            context: context.into(),
            routes: Mutex::new(Vec::new()),
            dialog: Mutex::new(None),
            handler_id: Mutex::new(None),
        });

        let weak: Weak<InterceptorInner> = Arc::downgrade(&inner);
        let id = connection.on_live_event(move |event: &Event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        });
        *inner.handler_id.lock() = Some(id);

        debug!(context = %inner.context, handler = %id, "Interceptor attached");
        Self { inner }
    }

    /// Adds a route. Routes are tried in the order they were added.
    pub fn route<F>(&self, pattern: impl Into<UrlPattern>, handler: F)
    where
        F: Fn(&InterceptedRequest) -> RouteDecision + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        trace!(context = %self.inner.context, pattern = %pattern, "Route added");
        self.inner.routes.lock().push((pattern, Arc::new(handler)));
    }

    /// Removes every route registered with `pattern`. Returns how many were
    /// removed.
    pub fn unroute(&self, pattern: &str) -> usize {
        let mut routes = self.inner.routes.lock();
        let before = routes.len();
        routes.retain(|(p, _)| p.as_str() != pattern);
        before - routes.len()
    }

    /// Sets the dialog handler, replacing any previous one.
    pub fn on_dialog<F>(&self, handler: F)
    where
        F: Fn(&Dialog) -> DialogDecision + Send + Sync + 'static,
    {
        *self.inner.dialog.lock() = Some(Arc::new(handler));
    }

    /// Removes the dialog handler; dialogs are dismissed again.
    pub fn clear_dialog_handler(&self) {
        *self.inner.dialog.lock() = None;
    }

    /// Removes the connection event handler. Idempotent.
    ///
    /// Returns `true` if this call detached it.
    pub fn detach(&self) -> bool {
        let id = self.inner.handler_id.lock().take();
        match id {
            Some(id) => {
                debug!(context = %self.inner.context, "Interceptor detached");
                self.inner.connection.remove_event_handler(id)
            }
            None => false,
        }
    }

    /// Context this interceptor serves.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &ContextId {
        &self.inner.context
    }

    /// Number of routes.
    #[inline]
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.inner.routes.lock().len()
    }

    /// Returns `true` until [`detach`](Self::detach) is called.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.handler_id.lock().is_some()
    }
}

// ============================================================================
// Event Handling
// ============================================================================

impl InterceptorInner {
    fn handle_event(&self, event: &Event) {
        if !event.belongs_to(&self.context) {
            return;
        }

        match event.parse() {
            ParsedEvent::NetworkBeforeRequestSent {
                is_blocked: true,
                request_id,
                url,
                method,
                headers,
                ..
            } if !request_id.is_empty() => {
                self.handle_request(InterceptedRequest {
                    request_id,
                    url,
                    method,
                    headers,
                });
            }

            ParsedEvent::UserPromptOpened {
                prompt_type,
                message,
                default_value,
                ..
            } => {
                self.handle_dialog(Dialog {
                    context: self.context.clone(),
                    prompt_type,
                    message,
                    default_value,
                });
            }

            _ => {}
        }
    }

    fn handle_request(&self, request: InterceptedRequest) {
        let route = self
            .routes
            .lock()
            .iter()
            .find(|(pattern, _)| pattern.matches(&request.url))
            .map(|(pattern, handler)| (pattern.clone(), Arc::clone(handler)));

        let Some((pattern, handler)) = route else {
            trace!(url = %request.url, "No route matched, continuing");
            self.connection.send_detached(
                CONTINUE_REQUEST_METHOD,
                Some(json!({ "request": request.request_id })),
            );
            return;
        };

        let decision = match catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(decision) => decision,
            Err(payload) => {
                warn!(
                    pattern = %pattern,
                    url = %request.url,
                    panic = panic_message(payload.as_ref()),
                    "Route handler panicked, continuing request"
                );
                RouteDecision::default()
            }
        };

        debug!(url = %request.url, pattern = %pattern, decision = decision.method(), "Route decided");
        let (method, params) = decision.into_command(&request.request_id);
        self.connection.send_detached(method, Some(params));
    }

    fn handle_dialog(&self, dialog: Dialog) {
        let handler = self.dialog.lock().clone();

        let decision = match handler {
            Some(handler) => match catch_unwind(AssertUnwindSafe(|| handler(&dialog))) {
                Ok(decision) => decision,
                Err(payload) => {
                    warn!(
                        context = %self.context,
                        panic = panic_message(payload.as_ref()),
                        "Dialog handler panicked, dismissing"
                    );
                    DialogDecision::Dismiss
                }
            },
            None => {
                trace!(context = %self.context, "No dialog handler, dismissing");
                DialogDecision::Dismiss
            }
        };

        let (method, params) = decision.into_command(&self.context);
        self.connection.send_detached(method, Some(params));
    }
}

// ============================================================================
// Tests
// ============================================================================
