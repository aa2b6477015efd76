//! Request signing for the store API.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const SIGN_FIELD: &str = "sign";

/// Form fields of a store request, kept sorted so the signature is stable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// `k1=v1&k2=v2` over every field except the signature itself, keys and
    /// values form-urlencoded so separators inside values stay distinct.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != SIGN_FIELD)
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn encode(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

/// Lowercase hex HMAC-SHA256 of the canonical payload keyed with `app_key`.
pub fn sign(payload: &Payload, app_key: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(app_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key length is unrestricted"),
    };
    mac.update(payload.canonical().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Attach the `sign` field computed over the other fields.
pub fn signed(mut payload: Payload, app_key: &str) -> Payload {
    let signature = sign(&payload, app_key);
    payload.insert(SIGN_FIELD, signature);
    payload
}
