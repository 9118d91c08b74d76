//! A real listener, a real verifier and a stand-in backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alchemorsel_gate::{HttpServer, HttpTokenVerifier, Security, Shutdown};
use common::{app, sign_in, start_verify_backend, test_config, VALID_TOKEN};
use reqwest::{redirect::Policy, StatusCode};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_gate_verifies_tokens_against_backend_and_shuts_down() {
    let backend = start_verify_backend().await;

    let mut config = test_config();
    config.auth.api_base_url = format!("http://{backend}/api/v1");
    config.auth.verify_timeout_ms = 2000;

    let verifier = Arc::new(HttpTokenVerifier::from_config(&config.auth).unwrap());
    let security = Security::new(config, verifier);
    let (good_cookie, _) = sign_in(&security, VALID_TOKEN);
    let (revoked_cookie, revoked_id) = sign_in(&security, "revoked");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = app(&security);
    let server = HttpServer::new(security.clone(), routes);

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();
    let url = format!("http://{addr}/dashboard");

    let anonymous = client.get(&url).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        anonymous.headers()["location"],
        "/login?redirect=/dashboard"
    );

    let allowed = client
        .get(&url)
        .header("cookie", &good_cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(allowed.text().await.unwrap(), "dashboard");

    let revoked = client
        .get(&url)
        .header("cookie", &revoked_cookie)
        .header("hx-request", "true")
        .send()
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::UNAUTHORIZED);
    let stored = security.sessions().store().lookup(&revoked_id).unwrap();
    assert!(!stored.is_authenticated());

    drop(client);
    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server stops after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unreachable_backend_fails_closed() {
    // Bind then drop so nothing is listening on the port.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = test_config();
    config.auth.api_base_url = format!("http://{dead}/api/v1");
    config.auth.verify_timeout_ms = 1000;

    let verifier = Arc::new(HttpTokenVerifier::from_config(&config.auth).unwrap());
    let security = Security::new(config, verifier);
    let (cookie, id) = sign_in(&security, VALID_TOKEN);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = app(&security);
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(HttpServer::new(security.clone(), routes).run(listener, shutdown.clone()));

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(format!("http://{addr}/dashboard"))
        .header("cookie", cookie)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    assert!(location.ends_with("&expired=1"), "{location}");
    assert!(!security.sessions().store().lookup(&id).unwrap().is_authenticated());

    drop(client);
    shutdown.trigger();
    handle.await.unwrap().unwrap();
}
