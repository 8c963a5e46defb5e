//! Package catalog - installs, updates and the per-user registry
//!
//! # Architecture
//!
//! ```text
//! Update server
//!     │
//!     ├── descriptor (JSON)  ← {version, url, force, digest}
//!     └── *.tar.gz           ← signed package archives
//!            │
//!            ▼
//!     UpdateCoordinator      ← stage → validate → copy → commit → finish
//!            │
//!            ▼
//!     <root>/v<version>/     ← active version directory
//!     <root>/cache/settings.json
//! ```

pub mod archive;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod registry;

pub use archive::{package_directory, pack_directory};
pub use descriptor::{UpdateDescriptor, UpdateQuery, UpdateSource};
pub use error::UpdateError;
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{MemoryFetcher, PackageFetcher};
pub use installer::{Installed, PackageSource, Update, UpdateCoordinator, UpdateGuard};
pub use registry::{PackageRegistry, PackageRegistryEntry};
