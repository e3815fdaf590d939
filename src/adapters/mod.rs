//! Adapters over external tools
//!
//! Each adapter is a minimal trait so test doubles and alternative tools
//! can be substituted behind the pipeline.

pub mod docker;
pub mod git;
pub mod manifest;
pub mod registry;

pub use docker::{DockerCli, ImageBuilder};
pub use git::{GitFetcher, SourceFetcher};
pub use manifest::{ManifestValidator, YamlManifestValidator, CONFIG_MANIFEST, DOCKERFILE};
pub use registry::{EcrRegistry, RegistryClient};
