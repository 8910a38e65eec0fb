//! Container runtime access for the deployment tasks.
//!
//! - [`ContainerRuntime`]: the operations the tasks need (list by label,
//!   create, start, stop, restart, remove, pull, build).
//! - [`DockerClient`]: Docker Engine API implementation over a Unix socket
//!   or TCP.
//! - [`env_file`]: `--env-file` parsing, since the engine API only accepts
//!   resolved `KEY=VALUE` lists.

pub mod docker;
pub mod env_file;
pub mod error;
pub mod runtime;
pub mod types;

pub use docker::{split_image_tag, DockerClient};
pub use error::RuntimeError;
pub use runtime::ContainerRuntime;
pub use types::{
    ContainerFilter, ContainerSpec, ContainerSummary, PortBinding, PublishedPort, RestartPolicy,
};
