use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{LedgerError, LedgerRepository};
use crate::models::{
    customers::{Customer, NewCustomer, PhoneLookup, SearchResults},
    identifiers::{CustomerId, QrToken},
    transactions::{PurchaseRequest, RedemptionRequest, Transaction, TransactionKind},
};

/// HTTP client for the loyalty ledger REST API.
pub struct LedgerApi {
    url: String,
    client: reqwest::Client,
}

impl LedgerApi {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// Sends `request` and returns the body of a 2xx response.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<String, LedgerError> {
        let request_id = Uuid::new_v4().hyphenated().to_string();
        let response = request.header("X-Request-Id", &request_id).send().await?;

        let status = response.status();
        let body = response.text().await?;
        log::debug!("Ledger responded {} to request {}.", status, request_id);

        if status.is_success() {
            return Ok(body);
        }

        let message = error_message(&body).unwrap_or_else(|| status.to_string());
        log::warn!("Ledger request {} failed: {} {}", request_id, status, message);

        Err(match status {
            StatusCode::NOT_FOUND => LedgerError::NotFound(message),
            s if s.is_client_error() => LedgerError::Rejected {
                status: s.as_u16(),
                message,
            },
            s => LedgerError::Server {
                status: s.as_u16(),
                message,
            },
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, LedgerError> {
        let body = self.execute(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Sends a mutation. Any 2xx means the ledger applied it, so a reply that
    /// does not decode is logged and replaced by `fallback` instead of failing.
    async fn acknowledge(
        &self,
        request: reqwest::RequestBuilder,
        fallback: Transaction,
    ) -> Result<Transaction, LedgerError> {
        let body = self.execute(request).await?;
        Ok(acknowledgement(&body, fallback))
    }
}

fn acknowledgement(body: &str, fallback: Transaction) -> Transaction {
    match serde_json::from_str::<Transaction>(body) {
        Ok(transaction) => transaction,
        Err(e) => {
            log::warn!("Unreadable acknowledgement from the ledger ({}): {}", e, body);
            fallback
        }
    }
}

/// The ledger reports failures as `{"error": "..."}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::to_string)
}

#[async_trait]
impl LedgerRepository for LedgerApi {
    async fn register_customer(&self, customer: &NewCustomer) -> Result<Customer, LedgerError> {
        log::info!("Registering customer {}.", customer.name);
        let request = self
            .client
            .post(self.endpoint("/clientes/registro/"))
            .json(customer);

        self.send(request).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Customer, LedgerError> {
        let request = self
            .client
            .post(self.endpoint("/clientes/consulta/"))
            .json(&PhoneLookup { phone });

        self.send(request).await
    }

    async fn find_by_token(&self, token: &QrToken) -> Result<Customer, LedgerError> {
        let request = self
            .client
            .get(self.endpoint("/clientes/qr/buscar/"))
            .query(&[("qr_data", token.as_str())]);

        self.send(request).await
    }

    async fn search_by_name(&self, query: &str) -> Result<Vec<Customer>, LedgerError> {
        let request = self
            .client
            .get(self.endpoint("/clientes/buscar/"))
            .query(&[("q", query)]);

        let results: SearchResults = self.send(request).await?;
        Ok(results.clientes)
    }

    async fn record_purchase(&self, request: &PurchaseRequest) -> Result<Transaction, LedgerError> {
        log::info!(
            "Recording purchase of {} for {}.",
            request.monto,
            request.qr_data
        );
        let fallback = Transaction {
            kind: Some(TransactionKind::Purchase),
            amount: Some(request.monto),
            description: Some(request.descripcion.clone()),
            ..Default::default()
        };
        let request = self
            .client
            .post(self.endpoint("/clientes/qr/transaccion/"))
            .json(request);

        self.acknowledge(request, fallback).await
    }

    async fn redeem_points(
        &self,
        request: &RedemptionRequest,
    ) -> Result<Transaction, LedgerError> {
        log::info!(
            "Redeeming {} points for {}.",
            request.puntos_a_canjear,
            request.qr_data
        );
        let fallback = Transaction {
            kind: Some(TransactionKind::Redemption),
            points_used: request.puntos_a_canjear,
            description: Some(request.descripcion.clone()),
            ..Default::default()
        };
        let request = self
            .client
            .post(self.endpoint("/clientes/qr/canje/"))
            .json(request);

        self.acknowledge(request, fallback).await
    }

    async fn list_transactions(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let request = self
            .client
            .get(self.endpoint(&format!("/transacciones/cliente/{}/", customer_id)));

        self.send(request).await
    }
}
