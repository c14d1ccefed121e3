//! Caller identity carried in the `x-rh-identity` header.
//!
//! The header is a base64-encoded JSON document set by the platform gateway.
//! It is trusted as-is: signature checks happen upstream.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

pub const IDENTITY_HEADER: &str = "x-rh-identity";

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("missing identity header")]
    Missing,

    #[error("invalid identity header: {0}")]
    Malformed(String),

    #[error("identity header has no organization id")]
    MissingOrgId,

    #[error("unsupported account type: 'Associate'")]
    Associate,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    identity: Inner,
    #[serde(default)]
    entitlements: HashMap<String, Entitlement>,
}

#[derive(Debug, Default, Deserialize)]
struct Inner {
    #[serde(default)]
    account_number: String,
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    internal: Internal,
    #[serde(default)]
    user: User,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct Internal {
    #[serde(default)]
    org_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Entitlement {
    #[serde(default)]
    is_entitled: bool,
}

/// Decoded caller identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub org_id: String,
    pub account_number: String,
    pub email: String,
    pub kind: String,
    entitlements: HashMap<String, bool>,
    /// The header exactly as received; forwarded to services acting on the
    /// caller's behalf.
    pub raw: String,
}

impl Identity {
    /// Decode a header value. Associate (employee) identities are rejected.
    pub fn from_header(value: &str) -> Result<Self, IdentityError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(IdentityError::Missing);
        }

        let bytes = STANDARD
            .decode(value)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let inner = envelope.identity;

        if inner.kind == "Associate" {
            return Err(IdentityError::Associate);
        }

        let org_id = if inner.org_id.is_empty() {
            inner.internal.org_id
        } else {
            inner.org_id
        };
        if org_id.is_empty() {
            return Err(IdentityError::MissingOrgId);
        }

        Ok(Self {
            org_id,
            account_number: inner.account_number,
            email: inner.user.email,
            kind: inner.kind,
            entitlements: envelope
                .entitlements
                .into_iter()
                .map(|(name, e)| (name, e.is_entitled))
                .collect(),
            raw: value.to_string(),
        })
    }

    /// Whether the organization holds the named entitlement. Orgs without an
    /// entitlements block but with a billing account count as entitled.
    pub fn is_entitled(&self, name: &str) -> bool {
        match self.entitlements.get(name) {
            Some(entitled) => *entitled,
            None => !self.account_number.is_empty(),
        }
    }

    /// Build a header value for the given org/account. Used by tests and
    /// local tooling.
    pub fn encode(org_id: &str, account_number: &str, email: &str) -> String {
        let doc = serde_json::json!({
            "entitlements": { "rhel": { "is_entitled": true } },
            "identity": {
                "account_number": account_number,
                "type": "User",
                "user": { "email": email },
                "internal": { "org_id": org_id },
            }
        });
        STANDARD.encode(doc.to_string())
    }
}
