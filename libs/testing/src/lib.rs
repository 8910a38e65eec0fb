//! Test doubles for the deployment libraries.
//!
//! Each fake keeps its state behind a mutex, records the calls it receives
//! and enforces the same rules as the real service where tests depend on
//! them (locked CDN versions, container name conflicts).

pub mod cdn;
pub mod compute;
pub mod runtime;

pub use cdn::{backend, template_policy, CdnCall, FakeCdn};
pub use compute::{server, FakeCompute};
pub use runtime::{container, FakeRuntime, RuntimeCall};
