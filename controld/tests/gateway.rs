use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tower::ServiceExt;

use controld::api::create_router;
use controld::auth::{CredentialStore, SessionGate, SessionStore};
use controld::config::{AuthSection, Branches, ConfigStore, ControlConfig};
use controld::lifecycle::collaborator::{CollaboratorError, ServiceBuilder, ServiceSupervisor};
use controld::lifecycle::{LifecycleController, LifecycleState, Timeouts};
use controld::registry::{ClientType, ConnectionRegistry};
use controld::utils::state::AppState;

// "admin:hunter2"
const ADMIN_BASIC: &str = "Basic YWRtaW46aHVudGVyMg==";
// "admin:wrong"
const WRONG_BASIC: &str = "Basic YWRtaW46d3Jvbmc=";
const BEARER: &str = "Bearer eyJhbGciOiJIUzI1NiJ9.e30.sig";

struct MemoryCredentials(HashMap<String, String>);

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentials {
    async fn verify(&self, username: &str, password: &str) -> bool {
        self.0.get(username).is_some_and(|p| p == password)
    }
}

/// Holds `start` until released so a transition can be observed in flight.
#[derive(Default)]
struct HeldSupervisor {
    release: Notify,
}

#[async_trait::async_trait]
impl ServiceSupervisor for HeldSupervisor {
    async fn start(&self) -> Result<(), CollaboratorError> {
        self.release.notified().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, CollaboratorError> {
        Ok("1.2.0".to_string())
    }
}

struct FixedBuilder;

#[async_trait::async_trait]
impl ServiceBuilder for FixedBuilder {
    async fn build(&self, _branches: &Branches) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn branches(&self, repository: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(vec![format!("{repository}#master"), format!("{repository}#dev")])
    }
}

struct Harness {
    state: Arc<AppState>,
    supervisor: Arc<HeldSupervisor>,
}

impl Harness {
    fn new(auth: AuthSection) -> Self {
        let config = ControlConfig {
            auth,
            ..ControlConfig::default()
        };
        let credentials = Arc::new(MemoryCredentials(HashMap::from([(
            "admin".to_string(),
            "hunter2".to_string(),
        )])));
        let supervisor = Arc::new(HeldSupervisor::default());
        let builder = Arc::new(FixedBuilder);
        let lifecycle =
            LifecycleController::new(supervisor.clone(), builder.clone(), Timeouts::default());
        let gate = SessionGate::new(
            credentials,
            Arc::new(SessionStore::new(Duration::from_secs(60))),
        );
        let state = Arc::new(AppState::new(
            Arc::new(ConfigStore::in_memory(config)),
            gate,
            lifecycle,
            builder,
        ));
        Self { state, supervisor }
    }

    fn app_from(&self, remote: [u8; 4]) -> Router {
        create_router(self.state.clone(), None)
            .layer(MockConnectInfo(SocketAddr::from((remote, 40000))))
    }

    fn remote_app(&self) -> Router {
        self.app_from([10, 0, 0, 7])
    }
}

fn auth_enabled() -> AuthSection {
    AuthSection {
        enable: true,
        local: false,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_login_page_redirects_home_when_auth_disabled() {
    let harness = Harness::new(AuthSection {
        enable: false,
        local: false,
    });

    let response = harness.remote_app().oneshot(get("/login.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/");

    let response = harness.remote_app().oneshot(get("/control/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_anonymous_remote_is_sent_to_login() {
    let harness = Harness::new(auth_enabled());

    let response = harness.remote_app().oneshot(get("/control/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login.html");
}

#[tokio::test]
async fn test_basic_credentials_issue_a_reusable_session() {
    let harness = Harness::new(auth_enabled());

    let response = harness
        .remote_app()
        .oneshot(
            Request::get("/control/status")
                .header(AUTHORIZATION, ADMIN_BASIC)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("controld_session="));
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let body = json_body(response).await;
    assert_eq!(body["state"], "stopped");

    let response = harness
        .remote_app()
        .oneshot(
            Request::get("/control/version")
                .header(COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_eq!(json_body(response).await["version"], "1.2.0");
}

#[tokio::test]
async fn test_wrong_credentials_are_rejected() {
    let harness = Harness::new(auth_enabled());

    let response = harness
        .remote_app()
        .oneshot(
            Request::post("/control/start")
                .header(AUTHORIZATION, WRONG_BASIC)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
    assert_eq!(harness.state.lifecycle.state(), LifecycleState::Stopped);
    assert!(harness.state.gate.sessions().is_empty().await);
}

fn get_with_authorization(uri: &str, authorization: &str) -> Request<Body> {
    Request::get(uri)
        .header(AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_non_basic_authorization_counts_as_no_credentials() {
    let open = Harness::new(AuthSection {
        enable: false,
        local: false,
    });
    let response = open
        .remote_app()
        .oneshot(get_with_authorization("/control/status", BEARER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let harness = Harness::new(auth_enabled());
    let response = harness
        .app_from([127, 0, 0, 1])
        .oneshot(get_with_authorization("/control/status", BEARER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for authorization in [BEARER, "Basic %%%not-base64%%%"] {
        let response = harness
            .remote_app()
            .oneshot(get_with_authorization("/control/status", authorization))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND, "{authorization}");
        assert_eq!(response.headers()[LOCATION], "/login.html");
    }
    assert!(harness.state.gate.sessions().is_empty().await);
}

#[tokio::test]
async fn test_unknown_session_cookie_is_sent_to_login() {
    let harness = Harness::new(auth_enabled());

    let response = harness
        .remote_app()
        .oneshot(
            Request::get("/config/get")
                .header(COOKIE, "controld_session=forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login.html");
}

#[tokio::test]
async fn test_login_assets_are_public() {
    let harness = Harness::new(auth_enabled());

    // No web root is mounted, so the request falls through to a 404 rather
    // than being redirected.
    let response = harness.remote_app().oneshot(get("/css/login.css")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_loopback_callers_bypass_auth_unless_required() {
    let harness = Harness::new(auth_enabled());
    let response = harness
        .app_from([127, 0, 0, 1])
        .oneshot(get("/control/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let strict = Harness::new(AuthSection {
        enable: true,
        local: true,
    });
    let response = strict
        .app_from([127, 0, 0, 1])
        .oneshot(get("/control/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_second_command_while_busy_is_rejected() {
    let harness = Harness::new(auth_enabled());
    let local = harness.app_from([127, 0, 0, 1]);

    let first = tokio::spawn(local.clone().oneshot(post_json("/control/start", json!({}))));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.state.lifecycle.state() != LifecycleState::Starting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    for command in ["/control/start", "/control/stop"] {
        let response = local
            .clone()
            .oneshot(post_json(command, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT, "{command}");
        assert_eq!(json_body(response).await["error"], "busy");
    }
    assert_eq!(harness.state.lifecycle.state(), LifecycleState::Starting);

    harness.supervisor.release.notify_one();
    let response = first.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["state"], "running");

    let response = local.oneshot(post_json("/control/start", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "invalid_transition");
}

#[tokio::test]
async fn test_config_patch_round_trip() {
    let harness = Harness::new(auth_enabled());
    let local = harness.app_from([127, 0, 0, 1]);

    let response = local
        .clone()
        .oneshot(post_json(
            "/config/set",
            json!({ "branches": { "pui": "feature/login" }, "auth": { "local": true } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["branches"]["pui"], "feature/login");
    assert_eq!(body["branches"]["pdb"], "master");

    // Loopback callers now need a session too.
    let response = local.clone().oneshot(get("/config/get")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = local
        .oneshot(
            Request::get("/config/get")
                .header(AUTHORIZATION, ADMIN_BASIC)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["auth"]["local"], true);
}

#[tokio::test]
async fn test_invalid_config_patch_is_rejected() {
    let harness = Harness::new(auth_enabled());
    let local = harness.app_from([127, 0, 0, 1]);

    let response = local
        .oneshot(post_json(
            "/config/set",
            json!({ "broadcast": { "status_secs": 0 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_config");
    assert_eq!(harness.state.config.get().await, ControlConfig {
        auth: auth_enabled(),
        ..ControlConfig::default()
    });
}

#[tokio::test]
async fn test_client_type_tags_a_registered_connection() {
    let harness = Harness::new(auth_enabled());
    let local = harness.app_from([127, 0, 0, 1]);

    let (tx, _rx) = ConnectionRegistry::channel();
    let id = harness.state.registry.add_client(tx).await;

    let response = local
        .clone()
        .oneshot(post_json(
            "/client/type",
            json!({ "connectionId": id, "clientType": "benchmarker" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        harness.state.registry.client_type(id).await,
        Some(ClientType::Benchmarker)
    );
    assert!(harness.state.registry.benchmarker_connected().await);

    harness.state.registry.remove_client(id).await;
    let response = local
        .oneshot(post_json(
            "/client/type",
            json!({ "connectionId": id, "clientType": "browser" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "unknown_connection");
}

#[tokio::test]
async fn test_branch_listings_use_configured_repositories() {
    let harness = Harness::new(auth_enabled());
    let local = harness.app_from([127, 0, 0, 1]);
    let repositories = harness.state.config.get().await.repositories;

    let response = local.clone().oneshot(get("/control/pdbBranches")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([
            format!("{}#master", repositories.pdb),
            format!("{}#dev", repositories.pdb)
        ])
    );

    let response = local.oneshot(get("/control/controlVersion")).await.unwrap();
    assert_eq!(
        json_body(response).await["version"],
        env!("CARGO_PKG_VERSION")
    );
}
