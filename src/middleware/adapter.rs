// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hand-off of proxy errors to the host's error chain.
//!
//! The [`ProxyError`] is moved into a [`BoxError`] as is: no wrapper, no new
//! message.  Error handlers further down see the original text through
//! `to_string()` and can recover the value itself with [`ProxyErrorExt`].

use crate::core::{BoxError, ProxyError};
use crate::debug_fmt;

/// Move `error` into the host's error type.
pub fn adapt(error: ProxyError) -> BoxError {
    debug_fmt!(
        "ErrorAdapter",
        "passing {} error to the host error chain: {}",
        error.kind(),
        error
    );
    Box::new(error)
}

/// Access to the [`ProxyError`] inside a host error.
pub trait ProxyErrorExt {
    /// The proxy error, if this error is one.
    fn proxy_error(&self) -> Option<&ProxyError>;

    /// Take the proxy error out, or get the original error back.
    fn into_proxy_error(self) -> Result<ProxyError, BoxError>;
}

impl ProxyErrorExt for BoxError {
    fn proxy_error(&self) -> Option<&ProxyError> {
        (**self).downcast_ref::<ProxyError>()
    }

    fn into_proxy_error(self) -> Result<ProxyError, BoxError> {
        self.downcast::<ProxyError>().map(|boxed| *boxed)
    }
}
