//! Package resolution and loading
//!
//! Finds the active version directory of a package root, loads its manifest,
//! checks host compatibility and verifies its files, producing a [`Host`].

pub mod error;
pub mod host;
pub mod manifest;
pub mod paths;
pub mod resolver;
pub mod settings;
pub mod version;

pub use error::PackageError;
pub use host::{derive_virtual_host, Host, HostOptions, LoadOptions};
pub use manifest::{HostBinding, Manifest, DEFAULT_MANIFEST_NAME};
pub use paths::{MappedPath, PackagePaths, PathScheme};
pub use resolver::{PackageResolver, ResolvedFrom, ResolvedVersion};
pub use settings::{InstallRecord, PackageSettings};
pub use version::{compare_versions, is_newer, PackageVersion};
