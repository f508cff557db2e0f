use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::identifiers::{token_for, CustomerId, QrToken};

/// Customer record as returned by the ledger. The terminal only ever holds a
/// read-only copy of it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub email: Option<String>,
    #[serde(rename = "puntos_acumulados")]
    pub points: i64,
    #[serde(rename = "fecha_registro")]
    pub registered_at: DateTime<Utc>,
    #[serde(rename = "codigo_qr_url", default, deserialize_with = "blank_as_none")]
    pub qr_image_url: Option<String>,
}

impl Customer {
    pub fn token(&self) -> QrToken {
        token_for(&self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewCustomer {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct PhoneLookup<'a> {
    #[serde(rename = "telefono")]
    pub phone: &'a str,
}

#[derive(Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub clientes: Vec<Customer>,
}

/// How a waiter identifies the customer at the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CustomerLookup {
    /// Raw scanned or typed QR text.
    Token(String),
    Phone(String),
    /// Picked from a search result.
    Id(CustomerId),
}

fn blank_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
