//! `--env-file` style environment files.
//!
//! One `KEY=VALUE` per line. Blank lines and `#` comments are skipped.
//! A bare `KEY` takes its value from the current process environment and
//! is dropped when unset. Values are taken verbatim, quotes included.

use std::path::Path;

use crate::error::RuntimeError;

/// Parse env file contents into `KEY=VALUE` entries.
pub fn parse(contents: &str) -> Vec<String> {
    parse_with(contents, |key| std::env::var(key).ok())
}

/// Parse with an explicit lookup for bare keys.
pub fn parse_with<F>(contents: &str, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut entries = Vec::new();
    for line in contents.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if !key.is_empty() {
                    entries.push(format!("{key}={value}"));
                }
            }
            None => {
                let key = line.trim();
                if let Some(value) = lookup(key) {
                    entries.push(format!("{key}={value}"));
                }
            }
        }
    }
    entries
}

/// Read and parse an env file.
pub async fn load(path: &Path) -> Result<Vec<String>, RuntimeError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        std::io::Error::new(e.kind(), format!("failed to read env file {}: {e}", path.display()))
    })?;
    Ok(parse(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let contents = "\
# nbviewer settings
GITHUB_OAUTH_KEY=abc
GITHUB_OAUTH_SECRET = s3cr3t=

NEW_RELIC_APP_NAME=\"nbviewer\"
FROM_SHELL
MISSING
";
        let entries = parse_with(contents, |key| {
            (key == "FROM_SHELL").then(|| "yes".to_string())
        });

        assert_eq!(
            entries,
            vec![
                "GITHUB_OAUTH_KEY=abc",
                "GITHUB_OAUTH_SECRET= s3cr3t=",
                "NEW_RELIC_APP_NAME=\"nbviewer\"",
                "FROM_SHELL=yes",
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/env_file")).await.unwrap_err();
        assert!(err.to_string().contains("env_file"));
    }
}
