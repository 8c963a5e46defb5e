//! localweb core library exports
//!
//! The trust and lifecycle core for local web apps: versioned packages of
//! static web content that are verified file-by-file before they are granted
//! access to host capabilities.

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod package;
pub mod trace;
pub mod trust;

pub use config::HostConfig;
pub use package::{Host, HostOptions, LoadOptions, Manifest, PackageError};
pub use trust::{SignatureError, SignatureProvider};
