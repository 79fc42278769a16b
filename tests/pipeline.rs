//! End-to-end handshake tests against a mocked platform.

use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use kcbridge::auth::{AuthPipeline, Credentials, Endpoints};
use kcbridge::GatewayError;

fn endpoints_for(server: &MockServer) -> Endpoints {
    let base = server.uri();
    Endpoints {
        login: format!("{base}/my/-/login/"),
        ajax: format!("{base}/my/-/login/ajax-get-token/"),
        auth: format!("{base}/my/-/login/auth/"),
        game: format!("{base}/netgame/social/-/gadgets/=/app_id=854854/"),
        make_request: format!("{base}/gadgets/makeRequest"),
        world_lookup_base: base.clone(),
        gadget: format!("{base}/gadget.xml"),
        origin: base,
        ..Endpoints::default()
    }
}

fn credentials() -> Credentials {
    Credentials {
        login_id: "admiral@example.com".into(),
        password: "hunter2".into(),
    }
}

const LOGIN_PAGE: &str = r#"<html><script>
track("set", "DMM_TOKEN", "abc123");
var payload = {"token": "xyz789"};
</script></html>"#;

async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/my/-/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
}

async fn mount_ajax(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/my/-/login/ajax-get-token/"))
        .and(header("DMM_TOKEN", "abc123"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .and(body_string_contains("token=xyz789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "refreshed456",
            "login_id": "fi_3a9",
            "password": "fi_b71",
        })))
        .mount(server)
        .await;
}

async fn mount_auth(server: &MockServer, game_body: &str) {
    Mock::given(method("POST"))
        .and(path("/my/-/login/auth/"))
        .and(body_string_contains("token=refreshed456"))
        // The dynamic field names from the ajax phase must come back as keys.
        .and(body_string_contains("fi_3a9=admiral%40example.com"))
        .and(body_string_contains("fi_b71=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>welcome</html>"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/netgame/social/-/gadgets/=/app_id=854854/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(game_body.to_string()))
        .mount(server)
        .await;
}

fn game_page_for(server: &MockServer) -> String {
    format!(
        r#"<script>var gadgetInfo = {{
URL : "{}/gadgets/ifr?owner=4321&st=sectoken",
}};</script>"#,
        server.uri()
    )
}

async fn mount_world_lookup(server: &MockServer, world_id: u32) {
    let body = format!(
        "svdata={}",
        serde_json::json!({ "api_result": 1, "api_data": { "api_world_id": world_id } })
    );
    Mock::given(method("GET"))
        .and(path_regex(r"^/kcsapi/api_world/get_id/4321/1/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Responds to broker requests keyed by whatever inner URL the caller asked
/// for, the way the real request broker does.
struct BrokerResponder;

impl Respond for BrokerResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let form: Vec<(String, String)> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();
        let inner_url = form
            .iter()
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let inner = format!(
            "{}{}",
            "x".repeat(27),
            serde_json::json!({
                "api_result": 1,
                "api_token": "entry-token-T",
                "api_starttime": 1234567890,
            })
        );
        let mut outer = serde_json::Map::new();
        outer.insert(inner_url, serde_json::json!({ "rc": 200, "body": inner }));
        ResponseTemplate::new(200).set_body_json(serde_json::Value::Object(outer))
    }
}

async fn mount_broker(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/gadgets/makeRequest"))
        .and(body_string_contains("authz=signed"))
        .and(body_string_contains("container=dmm"))
        .and(body_string_contains("st=sectoken"))
        .respond_with(BrokerResponder)
        .mount(server)
        .await;
}

#[tokio::test]
async fn resolve_osapi_runs_the_first_three_phases() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    let game = game_page_for(&server);
    mount_auth(&server, &game).await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    let osapi_url = pipeline.resolve_osapi(&credentials()).await.unwrap();
    assert_eq!(
        osapi_url,
        format!("{}/gadgets/ifr?owner=4321&st=sectoken", server.uri())
    );
}

#[tokio::test]
async fn resolve_flash_runs_the_full_handshake() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    let game = game_page_for(&server);
    mount_auth(&server, &game).await;
    mount_world_lookup(&server, 5).await;
    mount_broker(&server).await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    let entry = pipeline.resolve_flash(&credentials()).await.unwrap();

    // World 5 maps to table index 4.
    assert_eq!(entry.world_ip, "125.6.187.229");
    assert_eq!(entry.api_token, "entry-token-T");
    assert_eq!(entry.api_starttime, 1234567890);
    assert_eq!(
        entry.flash_url,
        "http://125.6.187.229/kcs/mainD2.swf?api_token=entry-token-T&amp;api_starttime=1234567890"
    );
}

#[tokio::test]
async fn stalled_login_page_times_out_the_first_phase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/my/-/login/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LOGIN_PAGE)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut endpoints = endpoints_for(&server);
    endpoints.phase_timeout = Duration::from_millis(50);

    let pipeline = AuthPipeline::new(endpoints, None).unwrap();
    match pipeline.resolve_osapi(&credentials()).await {
        Err(GatewayError::ConnectionTimeout(phase)) => assert_eq!(phase, "login page"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn missing_login_page_token_fails_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/my/-/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token": "xyz789"}"#))
        .mount(&server)
        .await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    match pipeline.resolve_osapi(&credentials()).await {
        Err(GatewayError::TokenExtractionFailed(which)) => assert_eq!(which, "dmm_token"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn password_reset_marker_aborts_the_attempt() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    Mock::given(method("POST"))
        .and(path("/my/-/login/auth/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>認証エラー</html>"))
        .mount(&server)
        .await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    assert!(matches!(
        pipeline.resolve_osapi(&credentials()).await,
        Err(GatewayError::PasswordResetRequired)
    ));
}

#[tokio::test]
async fn game_page_without_gadget_url_means_bad_credentials() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    mount_auth(&server, "<html>login form again</html>").await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    assert!(matches!(
        pipeline.resolve_osapi(&credentials()).await,
        Err(GatewayError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn world_lookup_error_result_fails_the_pipeline() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    let game = game_page_for(&server);
    mount_auth(&server, &game).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/kcsapi/api_world/get_id/4321/1/\d+$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"svdata={"api_result":0}"#),
        )
        .mount(&server)
        .await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    assert!(matches!(
        pipeline.resolve_flash(&credentials()).await,
        Err(GatewayError::WorldLookupFailed)
    ));
}

#[tokio::test]
async fn out_of_range_world_id_fails_the_pipeline() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    let game = game_page_for(&server);
    mount_auth(&server, &game).await;
    mount_world_lookup(&server, 42).await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    assert!(matches!(
        pipeline.resolve_flash(&credentials()).await,
        Err(GatewayError::WorldLookupFailed)
    ));
}

#[tokio::test]
async fn broker_error_code_fails_the_pipeline() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_ajax(&server).await;
    let game = game_page_for(&server);
    mount_auth(&server, &game).await;
    mount_world_lookup(&server, 5).await;

    struct FailingBroker;
    impl Respond for FailingBroker {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let inner_url = url::form_urlencoded::parse(&request.body)
                .find(|(k, _)| k == "url")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            let mut outer = serde_json::Map::new();
            outer.insert(inner_url, serde_json::json!({ "rc": 500, "body": "" }));
            ResponseTemplate::new(200).set_body_json(serde_json::Value::Object(outer))
        }
    }
    Mock::given(method("POST"))
        .and(path("/gadgets/makeRequest"))
        .respond_with(FailingBroker)
        .mount(&server)
        .await;

    let pipeline = AuthPipeline::new(endpoints_for(&server), None).unwrap();
    assert!(matches!(
        pipeline.resolve_flash(&credentials()).await,
        Err(GatewayError::ApiTokenLookupFailed)
    ));
}
