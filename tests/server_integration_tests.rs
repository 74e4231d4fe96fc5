// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The middleware served over a real socket.

use std::net::SocketAddr;

use foxy_middleware::{AppServer, ProxyConfig, ServerConfig, StatusCode, create_proxy_middleware};
use foxy_middleware::App;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_string, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

struct RunningServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    async fn start(app: App) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let server = AppServer::new(
            ServerConfig {
                shutdown_timeout_secs: 1,
                ..ServerConfig::default()
            },
            app,
        );
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn proxy_app(config: ProxyConfig) -> App {
    App::new()
        .with_middleware(create_proxy_middleware(config).unwrap())
        .with_error_handler_fn(common::something_broke)
}

#[tokio::test]
async fn test_proxies_get_with_query_and_headers() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("page", "2"))
        .and(header("x-api-key", "secret"))
        .and(header_exists("x-forwarded-for"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-upstream", "yes")
                .set_body_string("users page 2"),
        )
        .mount(&upstream)
        .await;

    let config = ProxyConfig::builder()
        .target(upstream.uri())
        .xfwd(true)
        .header("x-api-key", "secret")
        .path_rewrite("^/api", "")
        .build()
        .unwrap();
    let server = RunningServer::start(proxy_app(config)).await;

    let response = reqwest::get(server.url("/api/users?page=2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(response.text().await.unwrap(), "users page 2");

    server.stop().await;
}

#[tokio::test]
async fn test_streams_request_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(body_string("hello upstream"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&upstream)
        .await;

    let config = ProxyConfig::builder().target(upstream.uri()).build().unwrap();
    let server = RunningServer::start(proxy_app(config)).await;

    let response = reqwest::Client::new()
        .post(server.url("/echo"))
        .body("hello upstream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.text().await.unwrap(), "created");

    server.stop().await;
}

#[tokio::test]
async fn test_path_filter_passes_other_requests_on() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("proxied"))
        .mount(&upstream)
        .await;

    let config = ProxyConfig::builder()
        .target(upstream.uri())
        .path_filter("/api")
        .build()
        .unwrap();
    let server = RunningServer::start(proxy_app(config)).await;

    let proxied = reqwest::get(server.url("/api/x")).await.unwrap();
    assert_eq!(proxied.text().await.unwrap(), "proxied");

    let local = reqwest::get(server.url("/static/app.js")).await.unwrap();
    assert_eq!(local.status(), StatusCode::NOT_FOUND);
    assert_eq!(local.text().await.unwrap(), "Cannot GET /static/app.js");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_target_over_the_wire() {
    let config = ProxyConfig::builder().router_fn(|_| None).build().unwrap();
    let server = RunningServer::start(proxy_app(config)).await;

    let response = reqwest::get(server.url("/anything")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.text().await.unwrap(), "Something broke!");

    server.stop().await;
}
