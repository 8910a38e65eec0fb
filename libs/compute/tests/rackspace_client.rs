//! Rackspace client against a mock identity and compute service.

use nbdeploy_compute::{
    ensure_keypair, ComputeError, ComputeProvider, NewServer, RackspaceClient,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_identity(server: &MockServer) {
    let catalog = serde_json::json!({
        "access": {
            "token": {"id": "tok-123", "expires": "2030-01-01T00:00:00Z"},
            "serviceCatalog": [
                {
                    "name": "cloudFiles",
                    "type": "object-store",
                    "endpoints": [{"region": "DFW", "publicURL": "http://wrong.example"}]
                },
                {
                    "name": "cloudServersOpenStack",
                    "type": "compute",
                    "endpoints": [
                        {"region": "ORD", "publicURL": "http://ord.example/v2/1"},
                        {"region": "DFW", "publicURL": format!("{}/v2/1", server.uri())}
                    ]
                }
            ]
        }
    });

    Mock::given(method("POST"))
        .and(path("/v2.0/tokens"))
        .and(body_partial_json(serde_json::json!({
            "auth": {"RAX-KSKEY:apiKeyCredentials": {"username": "deploy", "apiKey": "k"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_connect_picks_region_endpoint_and_lists_servers() {
    let server = MockServer::start().await;
    mount_identity(&server).await;

    Mock::given(method("GET"))
        .and(path("/v2/1/servers/detail"))
        .and(query_param("name", "nbviewer"))
        .and(header("X-Auth-Token", "tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "servers": [
                {"id": "a", "name": "nbviewer-1", "status": "ACTIVE", "accessIPv4": "198.51.100.1"},
                {"id": "b", "name": "nbviewer-2", "status": "ACTIVE", "accessIPv4": "198.51.100.2"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = format!("{}/v2.0", server.uri());
    let client = RackspaceClient::connect(&identity, "deploy", "k", "dfw")
        .await
        .unwrap();
    let servers = client.list_servers("nbviewer").await.unwrap();

    assert_eq!(servers.len(), 2);
    assert_eq!(servers[1].public_ipv4(), Some("198.51.100.2"));
}

#[tokio::test]
async fn test_connect_unknown_region() {
    let server = MockServer::start().await;
    mount_identity(&server).await;

    let identity = format!("{}/v2.0", server.uri());
    let err = RackspaceClient::connect(&identity, "deploy", "k", "SYD")
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::Auth(_)));
}

#[tokio::test]
async fn test_connect_rejected_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2.0/tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let identity = format!("{}/v2.0", server.uri());
    let err = RackspaceClient::connect(&identity, "deploy", "bad", "DFW")
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::Auth(_)));
}

#[tokio::test]
async fn test_create_server_posts_wrapped_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/1/servers"))
        .and(body_partial_json(serde_json::json!({
            "server": {"name": "nbviewer-3", "imageRef": "img-1", "flavorRef": "general1-2", "key_name": "deploy"}
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "server": {"id": "new-id", "adminPass": "x"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RackspaceClient::with_token(&format!("{}/v2/1", server.uri()), "tok").unwrap();
    let created = client
        .create_server(&NewServer {
            name: "nbviewer-3".to_string(),
            image_id: "img-1".to_string(),
            flavor_id: "general1-2".to_string(),
            key_name: Some("deploy".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(created.id, "new-id");
    assert_eq!(created.status, "BUILD");
}

#[tokio::test]
async fn test_ensure_keypair_skips_existing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/1/os-keypairs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keypairs": [{"keypair": {"name": "deploy", "public_key": "ssh-ed25519 AAAA"}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/1/os-keypairs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keypair": {"name": "ops", "public_key": "ssh-ed25519 BBBB"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RackspaceClient::with_token(&format!("{}/v2/1", server.uri()), "tok").unwrap();
    assert!(!ensure_keypair(&client, "deploy", "ssh-ed25519 AAAA").await.unwrap());
    assert!(ensure_keypair(&client, "ops", "ssh-ed25519 BBBB\n").await.unwrap());
}

#[tokio::test]
async fn test_api_error_body_is_kept() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/1/images/detail"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .mount(&server)
        .await;

    let client = RackspaceClient::with_token(&format!("{}/v2/1", server.uri()), "tok").unwrap();
    match client.list_images().await.unwrap_err() {
        ComputeError::Api { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "service unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
