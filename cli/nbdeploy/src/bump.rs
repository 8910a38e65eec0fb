//! Version bumps for the deployment manifests.
//!
//! Both bumps read the current value from YAML, compare it with the newest
//! upstream value and rewrite the first textual occurrence, which keeps the
//! rest of the file (comments, ordering) intact.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::info;

/// Image reference at `image:` in the deployment config.
pub fn current_image(yaml: &str) -> Result<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    doc.get("image")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no string `image` key"))
}

/// Chart revision at `env.NBVIEWER_VERSION` in the workflow.
pub fn current_chart(yaml: &str) -> Result<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    doc.get("env")
        .and_then(|env| env.get("NBVIEWER_VERSION"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no string `env.NBVIEWER_VERSION` key"))
}

/// A computed bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bump {
    pub before: String,
    pub after: String,
    /// Rewritten file contents, when the value changed.
    pub rewritten: Option<String>,
    /// `key=value` outputs for CI.
    pub outputs: Vec<(String, String)>,
}

fn plan(contents: &str, before: String, after: String, outputs: Vec<(String, String)>) -> Bump {
    let rewritten = (before != after).then(|| contents.replacen(&before, &after, 1));
    Bump {
        before,
        after,
        rewritten,
        outputs,
    }
}

/// Bump the service image to `latest`.
pub fn plan_image(contents: &str, latest: &str) -> Result<Bump> {
    let before = current_image(contents)?;
    let tag = latest.split_once(':').map(|(_, tag)| tag).unwrap_or_default();
    let outputs = vec![
        ("image_before".to_string(), before.clone()),
        ("image_after".to_string(), latest.to_string()),
        ("image_tag".to_string(), tag.to_string()),
    ];
    Ok(plan(contents, before, latest.to_string(), outputs))
}

/// Bump the chart revision to `latest`.
pub fn plan_chart(contents: &str, latest: &str) -> Result<Bump> {
    let before = current_chart(contents)?;
    let short: String = latest.chars().take(7).collect();
    let outputs = vec![
        ("chart_before".to_string(), before.clone()),
        ("chart_after".to_string(), latest.to_string()),
        ("chart_short".to_string(), short),
    ];
    Ok(plan(contents, before, latest.to_string(), outputs))
}

/// Quote a value for a POSIX shell, leaving safe strings bare.
pub fn shell_quote(value: &str) -> Result<String> {
    let quoted = shlex::try_quote(value).map_err(|e| anyhow!("cannot quote {value:?}: {e}"))?;
    Ok(quoted.into_owned())
}

/// Append outputs to the `GITHUB_OUTPUT` file, or print them.
pub fn emit_outputs(outputs: &[(String, String)], github_output: Option<&Path>) -> Result<()> {
    let lines = outputs
        .iter()
        .map(|(key, value)| Ok(format!("{key}={}", shell_quote(value)?)))
        .collect::<Result<Vec<String>>>()?;

    match github_output {
        Some(path) => {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            for line in &lines {
                writeln!(file, "{line}")?;
            }
        }
        None => {
            for line in &lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

/// Write the rewritten file, if anything changed.
pub fn apply(bump: &Bump, path: &Path) -> Result<bool> {
    let Some(contents) = &bump.rewritten else {
        return Ok(false);
    };
    info!(before = %bump.before, after = %bump.after, file = %path.display(), "Updating version");
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[derive(Debug, Deserialize)]
struct TagPage {
    results: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Newest published `<repository>:<tag>`.
pub async fn latest_image(client: &reqwest::Client, tags_url: &str, repository: &str) -> Result<String> {
    let page: TagPage = client
        .get(tags_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("Unexpected tags response")?;
    let tag = page
        .results
        .first()
        .ok_or_else(|| anyhow!("{tags_url} lists no tags"))?;
    Ok(format!("{repository}:{}", tag.name))
}

/// Commit at `HEAD` of a remote git repository.
pub async fn latest_chart(repository: &str) -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["ls-remote", repository, "HEAD"])
        .output()
        .await
        .context("Failed to run git ls-remote")?;
    if !output.status.success() {
        bail!(
            "git ls-remote {repository} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_ls_remote(&String::from_utf8_lossy(&output.stdout))
}

fn parse_ls_remote(stdout: &str) -> Result<String> {
    stdout
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("git ls-remote returned nothing"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
# nbviewer deployment
image: jupyter/nbviewer:2023-01-01
replicas: 2
extraEnv:
  PREVIOUS: jupyter/nbviewer:2023-01-01
";

    const WORKFLOW: &str = "\
name: cd
env:
  NBVIEWER_VERSION: 0123456789abcdef0123456789abcdef01234567
jobs: {}
";

    #[test]
    fn test_image_bump_rewrites_first_occurrence() {
        let bump = plan_image(CONFIG, "jupyter/nbviewer:2024-02-02").unwrap();
        let rewritten = bump.rewritten.unwrap();
        assert!(rewritten.contains("image: jupyter/nbviewer:2024-02-02"));
        assert!(rewritten.contains("PREVIOUS: jupyter/nbviewer:2023-01-01"));
        assert!(rewritten.starts_with("# nbviewer deployment"));
        assert_eq!(
            bump.outputs[2],
            ("image_tag".to_string(), "2024-02-02".to_string())
        );
    }

    #[test]
    fn test_unchanged_image_is_not_rewritten() {
        let bump = plan_image(CONFIG, "jupyter/nbviewer:2023-01-01").unwrap();
        assert!(bump.rewritten.is_none());
        let dir = tempfile::tempdir().unwrap();
        assert!(!apply(&bump, &dir.path().join("unused.yaml")).unwrap());
    }

    #[test]
    fn test_chart_bump() {
        let latest = "fedcba9876543210fedcba9876543210fedcba98";
        let bump = plan_chart(WORKFLOW, latest).unwrap();
        assert_eq!(bump.before, "0123456789abcdef0123456789abcdef01234567");
        assert!(bump.rewritten.unwrap().contains(latest));
        assert_eq!(bump.outputs[2].1, "fedcba9");
    }

    #[test]
    fn test_missing_keys() {
        assert!(current_image("replicas: 2\n").is_err());
        assert!(current_chart("env: {}\n").is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("fedcba9").unwrap(), "fedcba9");
        for value in ["jupyter/nbviewer:2024-02-02", "a b", "it's", "$(rm -rf /)", ""] {
            let quoted = shell_quote(value).unwrap();
            assert_eq!(shlex::split(&quoted).unwrap(), vec![value.to_string()]);
        }
        assert!(shell_quote("nul\0byte").is_err());
    }

    #[test]
    fn test_outputs_append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github_output");
        fs::write(&path, "existing=1\n").unwrap();

        emit_outputs(
            &[("chart_short".to_string(), "abc1234".to_string())],
            Some(&path),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "existing=1\nchart_short=abc1234\n");
    }

    #[test]
    fn test_parse_ls_remote() {
        assert_eq!(parse_ls_remote("abc123\tHEAD\n").unwrap(), "abc123");
        assert!(parse_ls_remote("").is_err());
    }

    #[tokio::test]
    async fn test_latest_image_uses_first_tag() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/repositories/jupyter/nbviewer/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "count": 2,
                "results": [{"name": "2024-02-02"}, {"name": "2024-01-01"}]
            })))
            .mount(&server)
            .await;

        let url = format!("{}/v2/repositories/jupyter/nbviewer/tags", server.uri());
        let latest = latest_image(&reqwest::Client::new(), &url, "jupyter/nbviewer")
            .await
            .unwrap();
        assert_eq!(latest, "jupyter/nbviewer:2024-02-02");
    }
}
