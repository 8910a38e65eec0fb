//! Commands driven end to end against in-memory collaborators.

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::Parser;
use nbdeploy::commands::{Cli, CommandContext};
use nbdeploy::config::Settings;
use nbdeploy::output::OutputFormat;
use nbdeploy::secrets::Secrets;
use nbdeploy_reconcile::ReconcileError;
use nbdeploy::smoke::SmokeError;
use nbdeploy_testing::{backend, container, FakeCdn, FakeRuntime, RuntimeCall};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.fleet.advertise_host = Some("203.0.113.5".to_string());
    settings.fleet.host_name = Some("web-1".to_string());
    settings
}

fn context(runtime: &Arc<FakeRuntime>, cdn: &Arc<FakeCdn>) -> CommandContext {
    CommandContext::new(settings(), Secrets::default(), OutputFormat::Json)
        .with_runtime(runtime.clone())
        .with_cdn(cdn.clone())
}

async fn run(ctx: &CommandContext, args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("nbdeploy").chain(args.iter().copied()))?;
    cli.command.run(ctx).await
}

fn endpoints(pairs: &[(&str, u16)]) -> BTreeSet<(String, u16)> {
    pairs.iter().map(|(h, p)| (h.to_string(), *p)).collect()
}

#[tokio::test]
async fn test_reconcile_syncs_backends_with_the_host() {
    let runtime = Arc::new(FakeRuntime::with_containers(vec![
        container("nbviewer-8080", "nbviewer", 8080, "running"),
        container("nbviewer-8081", "nbviewer", 8081, "running"),
    ]));
    let cdn = Arc::new(FakeCdn::with_active(vec![
        backend("web-1-8080", "203.0.113.5", 8080),
        backend("web-0-8080", "203.0.113.4", 8080),
    ]));
    let ctx = context(&runtime, &cdn);

    run(&ctx, &["reconcile"]).await.unwrap();

    assert_eq!(
        cdn.active_endpoints(),
        endpoints(&[("203.0.113.5", 8080), ("203.0.113.5", 8081)])
    );
    let names: Vec<String> = cdn.active_backends().into_iter().map(|b| b.name).collect();
    assert!(names.contains(&"web-1-8081".to_string()));

    cdn.clear_calls();
    run(&ctx, &["fastly"]).await.unwrap();
    assert_eq!(cdn.mutation_count(), 0);
}

#[tokio::test]
async fn test_dry_run_does_not_mutate() {
    let runtime = Arc::new(FakeRuntime::with_containers(vec![container(
        "nbviewer-8080",
        "nbviewer",
        8080,
        "running",
    )]));
    let cdn = Arc::new(FakeCdn::with_active(vec![backend("old", "198.51.100.1", 8080)]));
    let ctx = context(&runtime, &cdn);

    run(&ctx, &["reconcile", "--dry-run"]).await.unwrap();

    assert_eq!(cdn.mutation_count(), 0);
    assert_eq!(cdn.versions().len(), 1);
}

#[tokio::test]
async fn test_reconcile_without_template_fails_cleanly() {
    let runtime = Arc::new(FakeRuntime::with_containers(vec![container(
        "nbviewer-8080",
        "nbviewer",
        8080,
        "running",
    )]));
    let cdn = Arc::new(FakeCdn::with_active(Vec::new()));
    let ctx = context(&runtime, &cdn);

    let err = run(&ctx, &["reconcile"]).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::MissingTemplate { .. })
    ));
    assert!(nbdeploy::error::hint(&err).is_some());
    assert_eq!(cdn.mutation_count(), 0);
}

#[tokio::test]
async fn test_cleanup_removes_exited_instances_only() {
    let runtime = Arc::new(FakeRuntime::with_containers(vec![
        container("nbviewer-8080", "nbviewer", 8080, "running"),
        container("nbviewer-8081", "nbviewer", 8081, "exited"),
        container("nbcache", "nbcache", 11211, "exited"),
    ]));
    let cdn = Arc::new(FakeCdn::empty());
    let ctx = context(&runtime, &cdn);

    run(&ctx, &["cleanup"]).await.unwrap();
    assert!(runtime.get("nbviewer-8081").is_none());
    assert!(runtime.get("nbviewer-8080").is_some());
    assert!(runtime.get("nbcache").is_some());

    // Nothing left to remove.
    run(&ctx, &["cleanup"]).await.unwrap();
}

#[tokio::test]
async fn test_pull_qualifies_bare_names() {
    let runtime = Arc::new(FakeRuntime::new());
    let cdn = Arc::new(FakeCdn::empty());
    let ctx = context(&runtime, &cdn);

    run(&ctx, &["pull", "nbviewer", "library/redis"]).await.unwrap();

    assert_eq!(
        runtime.calls(),
        vec![
            RuntimeCall::Pull("jupyter/nbviewer".to_string()),
            RuntimeCall::Pull("library/redis".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_logentries_requires_token() {
    let runtime = Arc::new(FakeRuntime::new());
    let cdn = Arc::new(FakeCdn::empty());
    let ctx = context(&runtime, &cdn);

    let err = run(&ctx, &["logentries"]).await.unwrap_err();
    assert!(err.to_string().contains("LOGENTRIES_TOKEN"));
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn test_smoke_fails_on_broken_notebook() {
    let server = MockServer::start().await;
    let thumbnails: String = (0..6)
        .map(|i| format!("<a class=\"thumbnail\" href=\"/github/demo/nb{i}.ipynb\"></a>"))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(thumbnails))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/github/demo/nb5.ipynb"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/github/demo/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runtime = Arc::new(FakeRuntime::new());
    let cdn = Arc::new(FakeCdn::empty());
    let ctx = context(&runtime, &cdn);

    let uri = server.uri();
    let err = run(&ctx, &["smoke", "--url", uri.as_str()]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SmokeError>(),
        Some(SmokeError::Notebooks { failed: 1, checked: 6 })
    ));
}
