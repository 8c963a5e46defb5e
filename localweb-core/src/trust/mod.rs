//! Trust system - per-file signature verification for packages
//!
//! Every shipped source file of a package is signed into a signature list
//! (`localwebapp.files.json`) that sits next to the manifest. A package is
//! trusted only when every listed file verifies and every source file on disk
//! is listed.
//!
//! Design principles:
//! - The signature primitive is injected through [`SignatureProvider`]
//! - Producer (`sign_directory`) and consumer (`VerificationEngine`) share one
//!   path normalization
//! - Fail closed on anything that cannot be classified

pub mod collection;
pub mod error;
pub mod hasher;
pub mod signer;
pub mod source;
pub mod verifier;

pub use collection::{sign_directory, FileCollection, FileSignatureEntry, SOURCE_EXTENSIONS};
pub use error::{SignatureError, SignatureErrorKind};
pub use signer::{
    decode_signature, encode_signature, Ed25519Provider, HmacSha256Provider, KeyPair,
    SignatureAlgorithm, SignatureProvider,
};
pub use source::{classify, contained_path, FileSource};
pub use verifier::{FileVerifier, VerificationEngine, VerifyMode};

/// Default file name of the signature list
pub const DEFAULT_FILES_NAME: &str = "localwebapp.files.json";
