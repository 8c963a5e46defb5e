//! `hash` and `symmetric` commands

use crate::bridge::envelope::{Reply, Request};
use crate::bridge::error::CommandError;
use crate::bridge::handlers::CommandContext;
use crate::trust::hasher::HashAlgorithm;
use crate::trust::{decode_signature, encode_signature};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde_json::json;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Output encodings for binary results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Hex,
    Base64Url,
    Base64,
}

impl Output {
    fn parse(request: &Request, default: Output) -> Result<Self, CommandError> {
        match request.str_arg("output").map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("hex") => Ok(Output::Hex),
            Some("base64url") | Some("b64url") => Ok(Output::Base64Url),
            Some("base64") => Ok(Output::Base64),
            Some(other) => Err(CommandError::argument(format!("Unknown output encoding '{other}'"))),
        }
    }

    fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Output::Hex => hex::encode(bytes),
            Output::Base64Url => encode_signature(bytes),
            Output::Base64 => STANDARD.encode(bytes),
        }
    }
}

/// Input bytes from `text` or `base64`
fn input_bytes(request: &Request) -> Result<Option<Vec<u8>>, CommandError> {
    if let Some(text) = request.str_arg("text") {
        return Ok(Some(text.as_bytes().to_vec()));
    }
    if let Some(encoded) = request.str_arg("base64") {
        let bytes = STANDARD
            .decode(encoded.trim())
            .ok()
            .or_else(|| decode_signature(encoded))
            .ok_or_else(|| CommandError::format("'base64' is not valid Base64"))?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

/// Digest text, Base64 bytes or (trusted only) a file
pub async fn hash(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let request = ctx.request;
    let algorithm: HashAlgorithm = request
        .str_arg("algorithm")
        .unwrap_or("sha256")
        .parse()
        .map_err(CommandError::Argument)?;
    let output = Output::parse(request, Output::Hex)?;

    let digest = if request.str_arg("file").is_some() {
        let path = ctx.local_path("file")?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CommandError::io(format!("Failed to read '{}'", path.display()), e))?;
        algorithm.digest(&bytes)
    } else {
        let bytes = input_bytes(request)?
            .ok_or_else(|| CommandError::argument("'text', 'base64' or 'file' is required"))?;
        algorithm.digest(&bytes)
    };

    Ok(Reply::data(output.encode(&digest)).with_info(json!({ "algorithm": algorithm.as_str() })))
}

/// AES-256-GCM: `generate`, `encrypt` or `decrypt`
///
/// Ciphertext is `nonce || ciphertext+tag`, Base64url encoded by default.
pub async fn symmetric(ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
    let request = ctx.request;
    let action = request.str_arg("action").unwrap_or("encrypt").to_ascii_lowercase();

    if action == "generate" {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        return Ok(Reply::data(encode_signature(&key)));
    }

    let key = load_key(ctx).await?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CommandError::argument(format!("Invalid key: {e}")))?;

    match action.as_str() {
        "encrypt" => {
            let plaintext = input_bytes(request)?
                .ok_or_else(|| CommandError::argument("'text' or 'base64' is required"))?;
            let sealed = encrypt(&cipher, &plaintext)?;
            let output = Output::parse(request, Output::Base64Url)?;
            Ok(Reply::data(output.encode(&sealed)))
        }
        "decrypt" => {
            let encoded = request.required_str("data")?;
            let sealed = decode_signature(encoded)
                .or_else(|| STANDARD.decode(encoded.trim()).ok())
                .ok_or_else(|| CommandError::format("'data' is not valid Base64"))?;
            let plaintext = decrypt(&cipher, &sealed)?;

            match request.str_arg("output") {
                Some("base64") => Ok(Reply::data(STANDARD.encode(&plaintext))),
                _ => String::from_utf8(plaintext)
                    .map(Reply::data)
                    .map_err(|_| CommandError::format("Decrypted data is not UTF-8; request output 'base64'")),
            }
        }
        other => Err(CommandError::argument(format!("Unknown action '{other}'"))),
    }
}

/// Key from `key` (Base64url) or `keyFile` (trusted only)
async fn load_key(ctx: &CommandContext<'_>) -> Result<Vec<u8>, CommandError> {
    let key = if let Some(encoded) = ctx.request.str_arg("key") {
        decode_signature(encoded).ok_or_else(|| CommandError::format("'key' is not Base64url"))?
    } else if ctx.request.str_arg("keyFile").is_some() {
        let path = ctx.local_path("keyFile")?;
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| CommandError::io("Failed to read key file", e))?;
        if content.len() == KEY_LEN {
            content
        } else {
            let text = String::from_utf8_lossy(&content);
            decode_signature(text.trim())
                .ok_or_else(|| CommandError::format("Key file must hold 32 raw bytes or Base64url"))?
        }
    } else {
        return Err(CommandError::argument("'key' or 'keyFile' is required"));
    };

    if key.len() != KEY_LEN {
        return Err(CommandError::argument(format!(
            "Key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

fn encrypt(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, CommandError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CommandError::format(format!("Encryption failed: {e}")))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn decrypt(cipher: &Aes256Gcm, sealed: &[u8]) -> Result<Vec<u8>, CommandError> {
    if sealed.len() < NONCE_LEN {
        return Err(CommandError::format("Ciphertext too short"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CommandError::format("Decryption failed: wrong key or corrupted data"))
}
