// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle hooks.
//!
//! A [`Hooks`] registry keeps one ordered list of callbacks per
//! [`LifecycleEvent`].  Invoking an event walks its list in registration
//! order and hands every callback the *same* mutable handles, so a callback
//! sees what the callbacks before it changed and the transport sees what the
//! last `proxyReq` callback left behind.
//!
//! | event      | fires when                                   | callback arguments                        |
//! |------------|----------------------------------------------|-------------------------------------------|
//! | `proxyReq` | the outgoing request is ready to be sent     | outgoing request, host request, host response |
//! | `proxyRes` | the upstream response arrived, before writing | upstream response, host request, host response |
//! | `error`    | resolution, forwarding or a hook failed       | error, host request, host response, target |


use std::fmt;
use std::sync::Arc;

use crate::core::{BoxError, OutgoingRequest, ProxyError, ProxyResponse, ResolvedTarget};
use crate::server::{HostRequest, HostResponse};
use crate::trace_fmt;

/// Named moments of the proxying lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The outgoing request has been prepared
    ProxyReq,
    /// The upstream response has been received
    ProxyRes,
    /// Something went wrong
    Error,
}

impl LifecycleEvent {
    /// All events, in lifecycle order.
    pub const ALL: [LifecycleEvent; 3] = [
        LifecycleEvent::ProxyReq,
        LifecycleEvent::ProxyRes,
        LifecycleEvent::Error,
    ];

    /// The event's registration name.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ProxyReq => "proxyReq",
            LifecycleEvent::ProxyRes => "proxyRes",
            LifecycleEvent::Error => "error",
        }
    }

    /// Look an event up by its registration name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a hook returns.  An `Err` is reported as a hook failure.
pub type HookResult = Result<(), BoxError>;

/// Callback for [`LifecycleEvent::ProxyReq`].
pub type ProxyReqHook =
    Arc<dyn Fn(&mut OutgoingRequest, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync>;

/// Callback for [`LifecycleEvent::ProxyRes`].
pub type ProxyResHook =
    Arc<dyn Fn(&mut ProxyResponse, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync>;

/// Callback for [`LifecycleEvent::Error`].
pub type ErrorHook = Arc<
    dyn Fn(&ProxyError, &HostRequest, &mut HostResponse, Option<&ResolvedTarget>) -> HookResult
        + Send
        + Sync,
>;

/// A callback tagged with the event it belongs to.
#[derive(Clone)]
pub enum Hook {
    ProxyReq(ProxyReqHook),
    ProxyRes(ProxyResHook),
    Error(ErrorHook),
}

impl Hook {
    /// Wrap a `proxyReq` callback.
    pub fn proxy_req<F>(f: F) -> Self
    where
        F: Fn(&mut OutgoingRequest, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        Hook::ProxyReq(Arc::new(f))
    }

    /// Wrap a `proxyRes` callback.
    pub fn proxy_res<F>(f: F) -> Self
    where
        F: Fn(&mut ProxyResponse, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        Hook::ProxyRes(Arc::new(f))
    }

    /// Wrap an `error` callback.
    pub fn error<F>(f: F) -> Self
    where
        F: Fn(&ProxyError, &HostRequest, &mut HostResponse, Option<&ResolvedTarget>) -> HookResult
            + Send
            + Sync
            + 'static,
    {
        Hook::Error(Arc::new(f))
    }

    /// The event this callback is registered under.
    pub fn event(&self) -> LifecycleEvent {
        match self {
            Hook::ProxyReq(_) => LifecycleEvent::ProxyReq,
            Hook::ProxyRes(_) => LifecycleEvent::ProxyRes,
            Hook::Error(_) => LifecycleEvent::Error,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.event()).finish()
    }
}

/// Ordered hook registry, one list per event.
#[derive(Clone, Default)]
pub struct Hooks {
    proxy_req: Vec<ProxyReqHook>,
    proxy_res: Vec<ProxyResHook>,
    error: Vec<ErrorHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("proxy_req", &self.proxy_req.len())
            .field("proxy_res", &self.proxy_res.len())
            .field("error", &self.error.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to its event's list.
    pub fn register(&mut self, hook: Hook) -> &mut Self {
        match hook {
            Hook::ProxyReq(f) => self.proxy_req.push(f),
            Hook::ProxyRes(f) => self.proxy_res.push(f),
            Hook::Error(f) => self.error.push(f),
        }
        self
    }

    /// Register a `proxyReq` callback.
    pub fn on_proxy_req<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut OutgoingRequest, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        self.register(Hook::proxy_req(f))
    }

    /// Register a `proxyRes` callback.
    pub fn on_proxy_res<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ProxyResponse, &HostRequest, &mut HostResponse) -> HookResult + Send + Sync + 'static,
    {
        self.register(Hook::proxy_res(f))
    }

    /// Register an `error` callback.
    pub fn on_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&ProxyError, &HostRequest, &mut HostResponse, Option<&ResolvedTarget>) -> HookResult
            + Send
            + Sync
            + 'static,
    {
        self.register(Hook::error(f))
    }

    /// Append every callback of `other`, keeping its order.
    pub fn extend(&mut self, other: Hooks) {
        self.proxy_req.extend(other.proxy_req);
        self.proxy_res.extend(other.proxy_res);
        self.error.extend(other.error);
    }

    /// Number of callbacks registered for `event`.
    pub fn len(&self, event: LifecycleEvent) -> usize {
        match event {
            LifecycleEvent::ProxyReq => self.proxy_req.len(),
            LifecycleEvent::ProxyRes => self.proxy_res.len(),
            LifecycleEvent::Error => self.error.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxy_req.is_empty() && self.proxy_res.is_empty() && self.error.is_empty()
    }

    /// Run the `proxyReq` callbacks.  The first failure stops the run.
    pub fn invoke_proxy_req(
        &self,
        proxy_req: &mut OutgoingRequest,
        req: &HostRequest,
        res: &mut HostResponse,
    ) -> Result<(), ProxyError> {
        trace_fmt!("Hooks", "invoking {} proxyReq hook(s)", self.proxy_req.len());
        for hook in &self.proxy_req {
            hook(proxy_req, req, res).map_err(|e| ProxyError::hook(LifecycleEvent::ProxyReq, e))?;
        }
        Ok(())
    }

    /// Run the `proxyRes` callbacks.  The first failure stops the run.
    pub fn invoke_proxy_res(
        &self,
        proxy_res: &mut ProxyResponse,
        req: &HostRequest,
        res: &mut HostResponse,
    ) -> Result<(), ProxyError> {
        trace_fmt!("Hooks", "invoking {} proxyRes hook(s)", self.proxy_res.len());
        for hook in &self.proxy_res {
            hook(proxy_res, req, res).map_err(|e| ProxyError::hook(LifecycleEvent::ProxyRes, e))?;
        }
        Ok(())
    }

    /// Run the `error` callbacks.  The first failure stops the run.
    pub fn invoke_error(
        &self,
        error: &ProxyError,
        req: &HostRequest,
        res: &mut HostResponse,
        target: Option<&ResolvedTarget>,
    ) -> Result<(), ProxyError> {
        trace_fmt!("Hooks", "invoking {} error hook(s)", self.error.len());
        for hook in &self.error {
            hook(error, req, res, target).map_err(|e| ProxyError::hook(LifecycleEvent::Error, e))?;
        }
        Ok(())
    }
}
