// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared helpers for the integration tests.

use foxy_middleware::{App, BoxError, HostRequest, HostResponse, ProxyErrorExt, StatusCode};
use http_body_util::BodyExt;
use reqwest::Body;
use reqwest::header::HeaderMap;

/// A response collected into memory.
#[allow(dead_code)]
pub struct Collected {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

#[allow(dead_code)]
impl Collected {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Send `request` through `app` and collect the response.
#[allow(dead_code)]
pub async fn send(app: &App, request: hyper::Request<Body>) -> Collected {
    let response = app.handle(request).await;
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("collect body").to_bytes();

    Collected {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// `GET path` with optional extra headers.
#[allow(dead_code)]
pub fn get(path: &str, headers: &[(&str, &str)]) -> hyper::Request<Body> {
    let mut builder = hyper::Request::builder().method("GET").uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from("")).expect("valid request")
}

/// Error handler answering `504 Something broke!`, recording the message
/// it received in the `x-error-message` header.
#[allow(dead_code)]
pub fn something_broke(error: BoxError, _req: &HostRequest, res: &mut HostResponse) -> Result<(), BoxError> {
    let message = match error.proxy_error() {
        Some(proxy_error) => proxy_error.message().to_string(),
        None => error.to_string(),
    };
    res.set_header("x-error-message", &message)?;
    res.set_status(StatusCode::GATEWAY_TIMEOUT);
    res.send("Something broke!");
    Ok(())
}
