//! Fastly client against a mock HTTP server.

use nbdeploy_cdn::{BackendPolicy, CdnApi, CdnError, DraftVersion, FastlyClient, NewBackend};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVICE: &str = "svc123";

fn client(server: &MockServer) -> FastlyClient {
    FastlyClient::new(&server.uri(), "secret-key", SERVICE).unwrap()
}

fn versions_body(active: u32, latest: u32) -> serde_json::Value {
    let versions: Vec<_> = (1..=latest)
        .map(|n| {
            serde_json::json!({
                "number": n,
                "active": n == active,
                "locked": n <= active,
                "service_id": SERVICE,
            })
        })
        .collect();
    serde_json::Value::Array(versions)
}

#[tokio::test]
async fn test_list_versions_sends_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/service/svc123/version"))
        .and(header("Fastly-Key", "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions_body(2, 3)))
        .expect(1)
        .mount(&server)
        .await;

    let versions = client(&server).list_versions().await.unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions[1].active);
    assert!(versions[2].is_editable());
}

#[tokio::test]
async fn test_list_backends_decodes_policy() {
    let server = MockServer::start().await;

    let body = serde_json::json!([
        {
            "name": "nbviewer-1-8080",
            "address": "10.0.0.1",
            "ipv4": "10.0.0.1",
            "port": 8080,
            "healthcheck": "nbviewer",
            "max_conn": 200,
            "weight": 100,
            "error_threshold": 0,
            "connect_timeout": 1000,
            "between_bytes_timeout": 10000,
            "first_byte_timeout": 15000,
            "auto_loadbalance": true,
            "version": 4,
            "service_id": SERVICE
        },
        {
            "name": "legacy",
            "address": null,
            "ipv4": "10.0.0.9",
            "port": 8081,
            "healthcheck": null
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/service/svc123/version/4/backend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let backends = client(&server).list_backends(4).await.unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0].policy.healthcheck.as_deref(), Some("nbviewer"));
    assert_eq!(backends[0].policy.first_byte_timeout, Some(15000));
    assert_eq!(backends[1].address, "10.0.0.9");
    assert_eq!(backends[1].policy, BackendPolicy::default());
}

#[tokio::test]
async fn test_create_backend_posts_form() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/service/svc123/version/5/backend"))
        .and(body_string_contains("name=nbviewer-2-8081"))
        .and(body_string_contains("address=10.0.0.2"))
        .and(body_string_contains("port=8081"))
        .and(body_string_contains("healthcheck=nbviewer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "nbviewer-2-8081"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let template = BackendPolicy {
        healthcheck: Some("nbviewer".to_string()),
        ..Default::default()
    };
    let backend = NewBackend::from_template("nbviewer-2-8081", "10.0.0.2", 8081, &template);
    client(&server).create_backend(5, &backend).await.unwrap();
}

#[tokio::test]
async fn test_api_error_carries_body() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/service/svc123/version/5/backend/gone"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string(r#"{"msg":"internal failure"}"#),
        )
        .mount(&server)
        .await;

    let err = client(&server).delete_backend(5, "gone").await.unwrap_err();
    match err {
        CdnError::Api { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("internal failure"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_draft_reuses_editable_latest_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/service/svc123/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions_body(2, 3)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/svc123/version/3/clone"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let api = client(&server);
    let draft = DraftVersion::open(&api).await.unwrap();
    assert_eq!(draft.number(), 3);
}

#[tokio::test]
async fn test_draft_clones_active_version_and_deploys() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/service/svc123/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(versions_body(3, 3)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/svc123/version/3/clone"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"number": 4})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/svc123/version/4/activate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"number": 4, "active": true})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/svc123/version/4/clone"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"number": 5})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    let mut draft = DraftVersion::open(&api).await.unwrap();
    assert_eq!(draft.number(), 4);

    let deployed = draft.deploy().await.unwrap();
    assert_eq!(deployed.activated, 4);
    assert_eq!(deployed.draft, 5);
    assert_eq!(draft.number(), 5);
}
