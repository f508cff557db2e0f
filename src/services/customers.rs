use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::points::ValidationError;
use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    customers::{Customer, NewCustomer},
    identifiers::{token_for, CustomerId, QrToken},
    transactions::{Transaction, TransactionKind},
};
use crate::repositories::LedgerRepository;

const COUNTRY_CODE: &str = "52";
const NATIONAL_DIGITS: usize = 10;

pub enum CustomerRequest {
    Register {
        name: String,
        phone: String,
        email: Option<String>,
        response: oneshot::Sender<Result<Registration, ServiceError>>,
    },
    FindByPhone {
        phone: String,
        response: oneshot::Sender<Result<Customer, ServiceError>>,
    },
    Search {
        query: String,
        response: oneshot::Sender<Result<Vec<Customer>, ServiceError>>,
    },
    History {
        customer_id: CustomerId,
        response: oneshot::Sender<Result<CustomerHistory, ServiceError>>,
    },
}

/// A freshly registered customer and the token to print on their QR card.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub customer: Customer,
    pub token: QrToken,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomerHistory {
    pub customer: Customer,
    pub transactions: Vec<Transaction>,
}

impl CustomerHistory {
    fn count(&self, kind: TransactionKind) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.kind == Some(kind))
            .count()
    }

    pub fn purchases(&self) -> usize {
        self.count(TransactionKind::Purchase)
    }

    pub fn redemptions(&self) -> usize {
        self.count(TransactionKind::Redemption)
    }
}

/// Normalizes a Mexican phone number to `+52` followed by ten digits.
///
/// Spaces, dashes, dots and parentheses are dropped. A bare ten-digit number
/// gets the country code prepended.
pub fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidPhone(raw.to_string());

    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if compact.is_empty() {
        return Err(ValidationError::MissingField("telefono"));
    }

    let (has_plus, digits) = match compact.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let national = match digits.strip_prefix(COUNTRY_CODE) {
        Some(rest) if rest.len() == NATIONAL_DIGITS => rest,
        _ if !has_plus && digits.len() == NATIONAL_DIGITS => digits,
        _ => return Err(invalid()),
    };

    Ok(format!("+{}{}", COUNTRY_CODE, national))
}

fn normalize_email(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let email = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(email) => email,
    };

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(Some(email.to_string()))
        }
        _ => Err(ValidationError::InvalidEmail(email.to_string())),
    }
}

pub fn new_customer(
    name: &str,
    phone: &str,
    email: Option<&str>,
) -> Result<NewCustomer, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("nombre"));
    }

    Ok(NewCustomer {
        name: name.to_string(),
        phone: normalize_phone(phone)?,
        email: normalize_email(email)?,
    })
}

#[derive(Clone)]
pub struct CustomerRequestHandler {
    ledger: Arc<dyn LedgerRepository>,
}

impl CustomerRequestHandler {
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        CustomerRequestHandler { ledger }
    }

    async fn register(
        &self,
        name: &str,
        phone: &str,
        email: Option<&str>,
    ) -> Result<Registration, ServiceError> {
        let new_customer = new_customer(name, phone, email)?;
        let customer = self.ledger.register_customer(&new_customer).await?;
        log::info!("Registered customer {} ({}).", customer.id, customer.name);

        Ok(Registration {
            token: customer.token(),
            customer,
        })
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Customer, ServiceError> {
        let phone = normalize_phone(phone)?;
        Ok(self.ledger.find_by_phone(&phone).await?)
    }

    async fn search(&self, query: &str) -> Result<Vec<Customer>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::MissingField("q").into());
        }

        let customers = self.ledger.search_by_name(query).await?;
        log::debug!("Search {:?} matched {} customers.", query, customers.len());
        Ok(customers)
    }

    async fn history(&self, customer_id: &CustomerId) -> Result<CustomerHistory, ServiceError> {
        customer_id.validate()?;
        let customer = self.ledger.find_by_token(&token_for(customer_id)).await?;
        let transactions = self.ledger.list_transactions(customer_id).await?;

        Ok(CustomerHistory {
            customer,
            transactions,
        })
    }
}

#[async_trait]
impl RequestHandler<CustomerRequest> for CustomerRequestHandler {
    async fn handle_request(&self, request: CustomerRequest) {
        match request {
            CustomerRequest::Register {
                name,
                phone,
                email,
                response,
            } => {
                let result = self.register(&name, &phone, email.as_deref()).await;
                let _ = response.send(result);
            }
            CustomerRequest::FindByPhone { phone, response } => {
                let customer = self.find_by_phone(&phone).await;
                let _ = response.send(customer);
            }
            CustomerRequest::Search { query, response } => {
                let customers = self.search(&query).await;
                let _ = response.send(customers);
            }
            CustomerRequest::History {
                customer_id,
                response,
            } => {
                let history = self.history(&customer_id).await;
                let _ = response.send(history);
            }
        }
    }
}

pub struct CustomerService;

impl CustomerService {
    pub fn new() -> Self {
        CustomerService {}
    }
}

#[async_trait]
impl Service<CustomerRequest, CustomerRequestHandler> for CustomerService {}
