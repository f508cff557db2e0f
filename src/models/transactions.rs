use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::{CustomerId, QrToken, TransactionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum TransactionKind {
    #[serde(rename = "compra")]
    Purchase,
    #[serde(rename = "canje")]
    Redemption,
    #[serde(rename = "ajuste")]
    Adjustment,
    #[serde(other)]
    Other,
}

impl TransactionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "COMPRA",
            TransactionKind::Redemption => "CANJE",
            TransactionKind::Adjustment => "AJUSTE",
            TransactionKind::Other => "OTRO",
        }
    }
}

/// A ledger entry. The terminal never edits one; it only asks the ledger to
/// append new ones.
///
/// Acknowledgements of a purchase or redemption use the same shape but the
/// ledger is free to omit fields, so everything except the kind-specific
/// point counters is optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    #[serde(default)]
    pub id: Option<TransactionId>,
    #[serde(rename = "cliente", default)]
    pub customer: Option<CustomerId>,
    #[serde(rename = "tipo", default)]
    pub kind: Option<TransactionKind>,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "monto", default)]
    pub amount: Option<Decimal>,
    #[serde(rename = "puntos_ganados", default)]
    pub points_earned: i64,
    #[serde(rename = "puntos_usados", default)]
    pub points_used: i64,
    #[serde(rename = "puntos_totales", default)]
    pub balance_after: Option<i64>,
    #[serde(rename = "fecha", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed change this entry made to the customer's balance.
    pub fn points_delta(&self) -> i64 {
        match self.kind {
            Some(TransactionKind::Purchase) => self.points_earned,
            Some(TransactionKind::Redemption) => -self.points_used,
            _ => self.points_earned - self.points_used,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PurchaseRequest {
    pub qr_data: QrToken,
    pub monto: Decimal,
    pub descripcion: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RedemptionRequest {
    pub qr_data: QrToken,
    pub puntos_a_canjear: i64,
    pub descripcion: String,
}
