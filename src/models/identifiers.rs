use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Namespace printed in front of every customer id on the loyalty QR codes.
pub const NAMESPACE: &str = "TIOWICHO";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Malformed identifier {0:?}: expected TIOWICHO:<digits>")]
pub struct MalformedIdentifier(pub String);

impl MalformedIdentifier {
    pub fn code(&self) -> &'static str {
        "MALFORMED_IDENTIFIER"
    }
}

/// Server-assigned customer id. The ledger serializes it as a JSON number,
/// older endpoints as a string; both are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        CustomerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fails unless the id can appear in a token, i.e. unless
    /// `resolve(token_for(id)) == id`.
    pub fn validate(&self) -> Result<(), MalformedIdentifier> {
        if is_digits(&self.0) {
            Ok(())
        } else {
            Err(MalformedIdentifier(self.0.clone()))
        }
    }
}

impl FromStr for CustomerId {
    type Err = MalformedIdentifier;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let id = raw.trim();
        if !is_digits(id) {
            return Err(MalformedIdentifier(raw.to_string()));
        }

        Ok(CustomerId(id.to_string()))
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CustomerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        number_or_string(deserializer).map(CustomerId)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        number_or_string(deserializer).map(TransactionId)
    }
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

/// The `qr_data` value sent to the ledger, always `NAMESPACE:<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QrToken(String);

impl QrToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn customer_id(&self) -> CustomerId {
        // Constructed only through `token_for` or a successful parse.
        CustomerId(self.0[NAMESPACE.len() + 1..].to_string())
    }
}

impl fmt::Display for QrToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QrToken {
    type Err = MalformedIdentifier;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let id = resolve(raw)?;
        Ok(token_for(&id))
    }
}

/// Extracts the customer id from a scanned or typed token.
///
/// Scanners tend to append a newline, so surrounding whitespace is ignored.
/// Everything else must match `NAMESPACE:<digits>` exactly.
pub fn resolve(raw: &str) -> Result<CustomerId, MalformedIdentifier> {
    let malformed = || MalformedIdentifier(raw.to_string());

    let (namespace, id) = raw.trim().split_once(':').ok_or_else(malformed)?;
    if namespace != NAMESPACE || !is_digits(id) {
        return Err(malformed());
    }

    Ok(CustomerId(id.to_string()))
}

fn is_digits(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

pub fn token_for(id: &CustomerId) -> QrToken {
    QrToken(format!("{}:{}", NAMESPACE, id.0))
}
