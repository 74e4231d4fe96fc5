// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use hyper::http::{Method, StatusCode, Uri};

use super::*;
use crate::core::{ProxyError, ResolvedTarget};
use crate::hooks::LifecycleEvent;
use crate::server::{HostRequest, HostResponse};

#[derive(Debug)]
struct StampPlugin;

impl Plugin for StampPlugin {
    fn name(&self) -> &str {
        "stamp"
    }

    fn apply(&self, hooks: &mut Hooks) {
        hooks.on_proxy_req(|proxy_req, _req, _res| proxy_req.set_header("x-stamp", "1"));
    }
}

fn request() -> HostRequest {
    HostRequest::new(Method::GET, Uri::from_static("/api/users?page=2"))
        .with_header("host", "shop.local")
        .unwrap()
}

#[test]
fn test_builtin_plugins_are_registered() {
    assert_eq!(create_plugin("logger").unwrap().name(), "logger");
    assert_eq!(create_plugin("error-response").unwrap().name(), "error-response");
}

#[test]
fn test_unknown_plugin() {
    let err = create_plugin("does-not-exist").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownPlugin(ref name) if name == "does-not-exist"));
}

#[test]
fn test_register_custom_plugin() {
    register_plugin("stamp", || Arc::new(StampPlugin) as Arc<dyn Plugin>);

    let mut hooks = Hooks::new();
    create_plugin("stamp").unwrap().apply(&mut hooks);
    assert_eq!(hooks.len(LifecycleEvent::ProxyReq), 1);
}

#[test]
fn test_logger_plugin_hooks() {
    let mut hooks = Hooks::new();
    LoggerPlugin.apply(&mut hooks);

    assert_eq!(hooks.len(LifecycleEvent::ProxyReq), 0);
    assert_eq!(hooks.len(LifecycleEvent::ProxyRes), 1);
    assert_eq!(hooks.len(LifecycleEvent::Error), 1);

    let mut res = HostResponse::new();
    hooks
        .invoke_error(&ProxyError::no_target(), &request(), &mut res, None)
        .unwrap();
    assert!(!res.is_finished());
}

#[test]
fn test_error_response_status_mapping() {
    use crate::core::ErrorKind;

    assert_eq!(
        ErrorResponsePlugin::status_for(ErrorKind::Transport(TransportFailure::Connect)),
        StatusCode::GATEWAY_TIMEOUT
    );
    assert_eq!(
        ErrorResponsePlugin::status_for(ErrorKind::Transport(TransportFailure::Timeout)),
        StatusCode::GATEWAY_TIMEOUT
    );
    assert_eq!(
        ErrorResponsePlugin::status_for(ErrorKind::Transport(TransportFailure::Body)),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        ErrorResponsePlugin::status_for(ErrorKind::Resolution),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        ErrorResponsePlugin::status_for(ErrorKind::Hook(LifecycleEvent::ProxyReq)),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_error_response_plugin_answers() {
    let mut hooks = Hooks::new();
    ErrorResponsePlugin.apply(&mut hooks);

    let target = ResolvedTarget::parse("http://127.0.0.1:9").unwrap();
    let error = ProxyError::timeout(std::time::Duration::from_millis(50));
    let mut res = HostResponse::new();
    hooks
        .invoke_error(&error, &request(), &mut res, Some(&target))
        .unwrap();

    assert!(res.is_finished());
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[test]
fn test_error_response_plugin_respects_finished_response() {
    let mut hooks = Hooks::new();
    ErrorResponsePlugin.apply(&mut hooks);

    let mut res = HostResponse::new();
    res.set_status(StatusCode::IM_A_TEAPOT).send("already answered");
    hooks
        .invoke_error(&ProxyError::no_target(), &request(), &mut res, None)
        .unwrap();

    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
}
