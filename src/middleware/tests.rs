// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;

use hyper::http::{Method, StatusCode, Uri};
use reqwest::Url;

use super::*;
use crate::core::{ErrorKind, NO_TARGET_MESSAGE, TransportFailure};
use crate::hooks::LifecycleEvent;
use crate::plugins::ErrorResponsePlugin;

/// What the mock transport saw.
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok(u16),
    Refused,
}

#[derive(Debug, Clone)]
struct MockTransport {
    reply: Reply,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl MockTransport {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn forward(&self, request: OutgoingRequest, target: &ResolvedTarget) -> Result<ProxyResponse, ProxyError> {
        let url = target.url_for(&request.path);
        self.seen.lock().unwrap().push(Seen {
            method: request.method.clone(),
            url: url.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
        });

        match self.reply {
            Reply::Ok(status) => {
                let mut response = ProxyResponse::new(StatusCode::from_u16(status).unwrap(), url);
                response.set_header("x-upstream", "mock").unwrap();
                response.set_header("connection", "close").unwrap();
                response.body = "upstream body".into();
                Ok(response)
            }
            Reply::Refused => Err(ProxyError::new(
                ErrorKind::Transport(TransportFailure::Connect),
                "connect ECONNREFUSED",
            )),
        }
    }
}

/// Answers after a delay taken from the `x-delay-ms` request header and
/// names the upstream that served it.
#[derive(Debug)]
struct SlowEchoTransport;

#[async_trait]
impl Transport for SlowEchoTransport {
    async fn forward(&self, request: OutgoingRequest, target: &ResolvedTarget) -> Result<ProxyResponse, ProxyError> {
        let delay = request
            .header("x-delay-ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let mut response = ProxyResponse::new(StatusCode::OK, target.url_for(&request.path));
        response.set_header("x-served-by", target.host()).unwrap();
        response.set_body(request.path.clone());
        Ok(response)
    }
}

fn header<'a>(seen: &'a Seen, name: &str) -> Option<&'a str> {
    seen.headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn request(path: &'static str) -> HostRequest {
    let mut req = HostRequest::new(Method::GET, Uri::from_static(path))
        .with_header("host", "localhost:3000")
        .unwrap()
        .with_header("connection", "keep-alive")
        .unwrap();
    req.context.client_ip = Some("127.0.0.1".to_string());
    req
}

fn middleware(config: ProxyConfig, reply: Reply) -> (ProxyMiddleware, MockTransport) {
    let transport = MockTransport::new(reply);
    (ProxyMiddleware::with_transport(config, transport.clone()), transport)
}

#[tokio::test]
async fn test_forwards_to_static_target() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local:8080")
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut req = request("/cookies?x=1");
    let mut res = HostResponse::new();
    let flow = mw.handle(&mut req, &mut res).await.unwrap();

    assert_eq!(flow, Flow::Done);
    assert!(res.is_finished());
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.header("x-upstream"), Some("mock"));
    assert!(res.header("connection").is_none());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::GET);
    assert_eq!(calls[0].url, "http://upstream.local:8080/cookies?x=1");
    assert_eq!(header(&calls[0], "host"), Some("localhost:3000"));
    assert!(header(&calls[0], "connection").is_none());
}

#[tokio::test]
async fn test_router_none_without_target_reaches_host_error_chain() {
    let config = ProxyConfig::builder()
        .change_origin(true)
        .router_fn(|_| None)
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut req = request("/get");
    let mut res = HostResponse::new();
    let err = mw.handle(&mut req, &mut res).await.unwrap_err();

    assert_eq!(err.to_string(), NO_TARGET_MESSAGE);
    let proxy_error = err.proxy_error().unwrap();
    assert_eq!(proxy_error.kind(), ErrorKind::Resolution);
    assert!(!res.is_finished());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_router_wins_over_target() {
    let config = ProxyConfig::builder()
        .target("http://fallback.local")
        .router_fn(|req| {
            req.path
                .starts_with("/v2")
                .then(|| "http://v2.local:9000".to_string())
        })
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    mw.handle(&mut request("/v2/users"), &mut res).await.unwrap();
    let mut res = HostResponse::new();
    mw.handle(&mut request("/v1/users"), &mut res).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].url, "http://v2.local:9000/v2/users");
    assert_eq!(calls[1].url, "http://fallback.local/v1/users");
}

#[tokio::test]
async fn test_malformed_target_is_a_resolution_error() {
    let config = ProxyConfig::builder().target("not a url").build().unwrap();
    let (mw, _) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    let err = mw.handle(&mut request("/"), &mut res).await.unwrap_err();

    assert_eq!(err.to_string(), NO_TARGET_MESSAGE);
    assert!(err.proxy_error().unwrap().source().is_some());
}

#[tokio::test]
async fn test_change_origin_is_visible_to_proxy_req_hooks() {
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();

    let config = ProxyConfig::builder()
        .target("http://api.internal:8080")
        .change_origin(true)
        .on_proxy_req(move |proxy_req, _req, _res| {
            *sink.lock().unwrap() = proxy_req.header("host").map(str::to_string);
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    mw.handle(&mut request("/"), &mut res).await.unwrap();

    assert_eq!(observed.lock().unwrap().as_deref(), Some("api.internal:8080"));
    assert_eq!(header(&transport.calls()[0], "host"), Some("api.internal:8080"));
}

#[tokio::test]
async fn test_proxy_req_hook_sets_cookie() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_req(|proxy_req, req, _res| {
            if let Some(session) = req.header("appsession") {
                proxy_req.set_header("cookie", &format!("appSession={session}"))?;
            }
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut with_session = request("/cookies")
        .with_header("appsession", "test-session")
        .unwrap();
    let mut res = HostResponse::new();
    mw.handle(&mut with_session, &mut res).await.unwrap();

    let mut res = HostResponse::new();
    mw.handle(&mut request("/cookies"), &mut res).await.unwrap();

    let calls = transport.calls();
    assert_eq!(header(&calls[0], "cookie"), Some("appSession=test-session"));
    assert_eq!(header(&calls[1], "cookie"), None);
}

#[tokio::test]
async fn test_proxy_res_hook_mutates_before_write() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_res(|proxy_res, _req, _res| {
            proxy_res.status = StatusCode::ACCEPTED;
            proxy_res.set_header("x-rewritten", "yes")
        })
        .build()
        .unwrap();
    let (mw, _) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    mw.handle(&mut request("/"), &mut res).await.unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.header("x-rewritten"), Some("yes"));
}

#[tokio::test]
async fn test_proxy_res_hook_replaces_body() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_res(|proxy_res, _req, _res| {
            proxy_res.set_header("content-length", "13")?;
            proxy_res.set_body("redacted");
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, _) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    mw.handle(&mut request("/"), &mut res).await.unwrap();

    assert_eq!(res.header("content-length"), Some("8"));
    let response = res.into_response();
    assert_eq!(response.body().as_bytes(), Some(&b"redacted"[..]));
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_target() {
    let resolved = Arc::new(AtomicUsize::new(0));
    let routed = Arc::new(Mutex::new(HashMap::new()));
    let (counter, table) = (resolved.clone(), routed.clone());

    let config = ProxyConfig::builder()
        .router_fn(move |req| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let target = if n % 2 == 0 { "even.local" } else { "odd.local" };
            table.lock().unwrap().insert(req.path.to_string(), target);
            Some(format!("http://{target}"))
        })
        .build()
        .unwrap();
    let mw = ProxyMiddleware::with_transport(config, SlowEchoTransport);

    // Earlier requests wait longer, so responses complete in reverse order.
    let paths: Vec<String> = (0..6).map(|i| format!("/orders/{i}")).collect();
    let responses = join_all(paths.iter().enumerate().map(|(i, path)| {
        let mw = mw.clone();
        let delay = ((paths.len() - i) * 10).to_string();
        async move {
            let mut req = HostRequest::new(Method::GET, path.parse::<Uri>().unwrap())
                .with_header("x-delay-ms", &delay)
                .unwrap();
            let mut res = HostResponse::new();
            mw.handle(&mut req, &mut res).await.unwrap();
            (path.clone(), res)
        }
    }))
    .await;

    assert_eq!(resolved.load(Ordering::SeqCst), paths.len());
    let routed = routed.lock().unwrap();
    let mut served = HashMap::new();
    for (path, res) in responses {
        let host = res.header("x-served-by").unwrap().to_string();
        assert_eq!(host, routed[&path]);
        assert_eq!(res.into_response().body().as_bytes(), Some(path.as_bytes()));
        *served.entry(host).or_insert(0) += 1;
    }
    assert_eq!(served["even.local"], 3);
    assert_eq!(served["odd.local"], 3);
}

#[tokio::test]
async fn test_transport_failure_runs_error_hooks_then_host_chain() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (on_res, on_err) = (events.clone(), events.clone());

    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_res(move |_, _, _| {
            on_res.lock().unwrap().push("proxyRes".to_string());
            Ok(())
        })
        .on_error(move |err, _req, _res, target| {
            on_err
                .lock()
                .unwrap()
                .push(format!("error:{}:{}", err, target.map(|t| t.to_string()).unwrap_or_default()));
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, _) = middleware(config, Reply::Refused);

    let mut res = HostResponse::new();
    let err = mw.handle(&mut request("/"), &mut res).await.unwrap_err();

    assert_eq!(err.to_string(), "connect ECONNREFUSED");
    assert_eq!(
        *events.lock().unwrap(),
        vec!["error:connect ECONNREFUSED:http://upstream.local".to_string()]
    );
}

#[tokio::test]
async fn test_error_hook_answering_stops_host_chain() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .with_plugin(ErrorResponsePlugin)
        .build()
        .unwrap();
    let (mw, _) = middleware(config, Reply::Refused);

    let mut res = HostResponse::new();
    let flow = mw.handle(&mut request("/api"), &mut res).await.unwrap();

    assert_eq!(flow, Flow::Done);
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_failing_hook_becomes_the_error() {
    let reached = Arc::new(Mutex::new(false));
    let flag = reached.clone();

    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_req(|_, _, _| Err("session store unavailable".into()))
        .on_error(|_, _, _, _| Err("error hook broke too".into()))
        .on_proxy_res(move |_, _, _| {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    let err = mw.handle(&mut request("/"), &mut res).await.unwrap_err();

    let proxy_error = err.into_proxy_error().unwrap();
    assert_eq!(proxy_error.kind(), ErrorKind::Hook(LifecycleEvent::ProxyReq));
    assert_eq!(proxy_error.to_string(), "session store unavailable");
    assert!(transport.calls().is_empty());
    assert!(!*reached.lock().unwrap());
}

#[tokio::test]
async fn test_proxy_req_hook_can_answer_without_forwarding() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .on_proxy_req(|_proxy_req, _req, res| {
            res.set_status(StatusCode::FORBIDDEN).send("blocked");
            Ok(())
        })
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    let flow = mw.handle(&mut request("/"), &mut res).await.unwrap();

    assert_eq!(flow, Flow::Done);
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_path_filter_passes_other_requests_on() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local")
        .path_filter("/api")
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    let flow = mw.handle(&mut request("/static/app.js"), &mut res).await.unwrap();

    assert_eq!(flow, Flow::Next);
    assert!(!res.is_finished());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_rewrite_static_headers_and_xfwd() {
    let config = ProxyConfig::builder()
        .target("http://upstream.local/base")
        .path_rewrite("^/api/(.*)$", "/$1")
        .header("x-api-key", "secret")
        .xfwd(true)
        .build()
        .unwrap();
    let (mw, transport) = middleware(config, Reply::Ok(200));

    let mut res = HostResponse::new();
    mw.handle(&mut request("/api/users?page=2"), &mut res).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].url, "http://upstream.local/base/users?page=2");
    assert_eq!(header(&calls[0], "x-api-key"), Some("secret"));
    assert_eq!(header(&calls[0], "x-forwarded-for"), Some("127.0.0.1"));
    assert_eq!(header(&calls[0], "x-forwarded-port"), Some("3000"));
}

#[test]
fn test_adapter_keeps_identity() {
    let boxed = adapt(ProxyError::no_target());
    assert_eq!(boxed.to_string(), NO_TARGET_MESSAGE);
    assert!(boxed.proxy_error().is_some_and(ProxyError::is_resolution));

    let other: BoxError = "plain".into();
    assert!(other.proxy_error().is_none());
    assert_eq!(other.into_proxy_error().unwrap_err().to_string(), "plain");
}

#[test]
fn test_proxy_response_url_is_kept() {
    let url = Url::parse("http://upstream.local/x").unwrap();
    let response = ProxyResponse::new(StatusCode::OK, url.clone());
    assert_eq!(response.url, url);
}
