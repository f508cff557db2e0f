use async_trait::async_trait;

use crate::models::{
    customers::{Customer, NewCustomer},
    identifiers::{CustomerId, QrToken},
    transactions::{PurchaseRequest, RedemptionRequest, Transaction},
};

pub mod ledger;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bad response format: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Ledger unavailable ({status}): {message}")]
    Server { status: u16, message: String },
}

/// The remote points ledger. It owns every customer record and every
/// transaction; the terminal only reads records and requests new entries.
#[async_trait]
pub trait LedgerRepository: Send + Sync + 'static {
    async fn register_customer(&self, customer: &NewCustomer) -> Result<Customer, LedgerError>;

    async fn find_by_phone(&self, phone: &str) -> Result<Customer, LedgerError>;

    async fn find_by_token(&self, token: &QrToken) -> Result<Customer, LedgerError>;

    async fn search_by_name(&self, query: &str) -> Result<Vec<Customer>, LedgerError>;

    async fn record_purchase(&self, request: &PurchaseRequest) -> Result<Transaction, LedgerError>;

    async fn redeem_points(&self, request: &RedemptionRequest)
        -> Result<Transaction, LedgerError>;

    async fn list_transactions(&self, customer_id: &CustomerId)
        -> Result<Vec<Transaction>, LedgerError>;
}
