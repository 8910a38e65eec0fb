//! Host provisioning helpers.

use tracing::info;

use crate::client::ComputeProvider;
use crate::error::ComputeError;
use crate::types::{Image, NewServer, Server};

/// Sequence number of a `<prefix>-<n>` server name.
pub fn server_number(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
}

/// Next free `<prefix>-<n>` name: one past the highest existing number.
pub fn next_server_name(servers: &[Server], prefix: &str) -> String {
    let next = servers
        .iter()
        .filter_map(|s| server_number(&s.name, prefix))
        .max()
        .map_or(1, |n| n + 1);
    format!("{prefix}-{next}")
}

/// First image whose name contains every fragment.
pub fn pick_image<'a>(images: &'a [Image], fragments: &[String]) -> Option<&'a Image> {
    images
        .iter()
        .find(|image| fragments.iter().all(|f| image.name.contains(f.as_str())))
}

/// Register `public_key` under `name` unless a keypair of that name exists.
///
/// Returns true when the keypair was created.
pub async fn ensure_keypair<P: ComputeProvider + ?Sized>(
    provider: &P,
    name: &str,
    public_key: &str,
) -> Result<bool, ComputeError> {
    let existing = provider.list_keypairs().await?;
    if existing.iter().any(|k| k.name == name) {
        return Ok(false);
    }
    provider.create_keypair(name, public_key.trim()).await?;
    Ok(true)
}

/// Parameters for [`provision_server`].
#[derive(Debug, Clone)]
pub struct ServerTemplate {
    pub prefix: String,
    pub flavor_id: String,
    pub image_fragments: Vec<String>,
    pub key_name: Option<String>,
}

/// Create the next `<prefix>-<n>` server from `template`.
pub async fn provision_server<P: ComputeProvider + ?Sized>(
    provider: &P,
    template: &ServerTemplate,
) -> Result<Server, ComputeError> {
    let existing = provider.list_servers(&template.prefix).await?;
    let name = next_server_name(&existing, &template.prefix);

    let images = provider.list_images().await?;
    let image = pick_image(&images, &template.image_fragments)
        .ok_or_else(|| ComputeError::NoMatchingImage(template.image_fragments.clone()))?;
    info!(name = %name, image = %image.name, "Provisioning server");

    provider
        .create_server(&NewServer {
            name,
            image_id: image.id.clone(),
            flavor_id: template.flavor_id.clone(),
            key_name: template.key_name.clone(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> Server {
        Server {
            id: name.to_string(),
            name: name.to_string(),
            status: "ACTIVE".to_string(),
            access_ipv4: None,
            addresses: Default::default(),
            created: None,
        }
    }

    #[test]
    fn test_next_server_name() {
        let servers = vec![server("nbviewer-2"), server("nbviewer-10"), server("nbviewer-statuspage")];
        assert_eq!(next_server_name(&servers, "nbviewer"), "nbviewer-11");
        assert_eq!(next_server_name(&[], "nbviewer"), "nbviewer-1");
    }

    #[test]
    fn test_server_number() {
        assert_eq!(server_number("nbviewer-7", "nbviewer"), Some(7));
        assert_eq!(server_number("nbviewer7", "nbviewer"), None);
        assert_eq!(server_number("other-7", "nbviewer"), None);
    }

    #[test]
    fn test_pick_image() {
        let images = vec![
            Image { id: "1".into(), name: "Ubuntu 16.04 LTS (Xenial Xerus)".into() },
            Image { id: "2".into(), name: "Ubuntu 16.04 LTS (Xenial Xerus) (PVHVM)".into() },
        ];
        let fragments = vec!["Ubuntu 16.04".to_string(), "PVHVM".to_string()];
        assert_eq!(pick_image(&images, &fragments).unwrap().id, "2");
        assert!(pick_image(&images, &["CentOS".to_string()]).is_none());
    }
}
