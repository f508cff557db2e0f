use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::models::{
    customers::{Customer, CustomerLookup},
    identifiers::{CustomerId, MalformedIdentifier},
};
use crate::repositories::{ledger::LedgerApi, LedgerError, LedgerRepository};
use crate::settings::Settings;

pub mod customers;
pub mod points;
pub mod session;

use customers::{CustomerHistory, CustomerRequest, CustomerRequestHandler, Registration};
use points::ValidationError;
use session::{Mutation, Outcome, Session, SessionRequest, SessionRequestHandler, SessionView};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    MalformedIdentifier(#[from] MalformedIdentifier),
    #[error("Customer not found: {0}")]
    NotFound(String),
    #[error("Rejected by the ledger: {0}")]
    Rejected(String),
    #[error("Could not reach the ledger: {0}")]
    Transport(String),
    #[error("Another operation is still in progress for this customer")]
    Busy,
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(e) => e.code(),
            ServiceError::MalformedIdentifier(e) => e.code(),
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Rejected(_) => "REJECTED",
            ServiceError::Transport(_) => "TRANSPORT",
            ServiceError::Busy => "BUSY",
            ServiceError::Communication(..) => "COMMUNICATION",
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(message) => ServiceError::NotFound(message),
            LedgerError::Rejected { message, .. } => ServiceError::Rejected(message),
            e @ (LedgerError::Http(_) | LedgerError::Decode(_) | LedgerError::Server { .. }) => {
                ServiceError::Transport(e.to_string())
            }
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    /// Handles every request in its own task, so a slow ledger call never
    /// blocks the queue. Handlers are responsible for their own exclusion.
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders into the running services. Cheap to clone.
#[derive(Clone)]
pub struct ServiceHandles {
    customer_channel: mpsc::Sender<CustomerRequest>,
    session_channel: mpsc::Sender<SessionRequest>,
}

pub fn start_services(settings: &Settings) -> Result<ServiceHandles, anyhow::Error> {
    let ledger = LedgerApi::new(
        &settings.ledger.url,
        Duration::from_secs(settings.ledger.timeout_secs),
    )?;
    log::info!("Using ledger at {}.", settings.ledger.url);

    Ok(start_services_with(Arc::new(ledger)))
}

pub fn start_services_with(ledger: Arc<dyn LedgerRepository>) -> ServiceHandles {
    let (customer_tx, mut customer_rx) = mpsc::channel(512);
    let (session_tx, mut session_rx) = mpsc::channel(512);

    let mut customer_service = customers::CustomerService::new();
    let mut session_service = session::SessionService::new();

    log::info!("Starting customer service.");
    let customer_ledger = ledger.clone();
    tokio::spawn(async move {
        customer_service
            .run(CustomerRequestHandler::new(customer_ledger), &mut customer_rx)
            .await;
    });

    log::info!("Starting session service.");
    tokio::spawn(async move {
        let handler = SessionRequestHandler::new(Arc::new(Session::new(ledger)));
        session_service.run(handler, &mut session_rx).await;
    });

    ServiceHandles {
        customer_channel: customer_tx,
        session_channel: session_tx,
    }
}

async fn call<T, R>(
    channel: &mpsc::Sender<T>,
    service: &str,
    request: impl FnOnce(oneshot::Sender<R>) -> T,
) -> Result<R, ServiceError>
where
    T: Send,
{
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))
}

impl ServiceHandles {
    pub async fn register(
        &self,
        name: String,
        phone: String,
        email: Option<String>,
    ) -> Result<Registration, ServiceError> {
        call(&self.customer_channel, "CustomerService", |response| {
            CustomerRequest::Register {
                name,
                phone,
                email,
                response,
            }
        })
        .await?
    }

    pub async fn find_by_phone(&self, phone: String) -> Result<Customer, ServiceError> {
        call(&self.customer_channel, "CustomerService", |response| {
            CustomerRequest::FindByPhone { phone, response }
        })
        .await?
    }

    pub async fn search(&self, query: String) -> Result<Vec<Customer>, ServiceError> {
        call(&self.customer_channel, "CustomerService", |response| {
            CustomerRequest::Search { query, response }
        })
        .await?
    }

    pub async fn history(&self, customer_id: CustomerId) -> Result<CustomerHistory, ServiceError> {
        call(&self.customer_channel, "CustomerService", |response| {
            CustomerRequest::History {
                customer_id,
                response,
            }
        })
        .await?
    }

    /// Opens the waiter's session on a customer. `None` means another open or
    /// a close overtook this one.
    pub async fn open(&self, lookup: CustomerLookup) -> Result<Option<Customer>, ServiceError> {
        call(&self.session_channel, "SessionService", |response| {
            SessionRequest::Open { lookup, response }
        })
        .await?
    }

    pub async fn submit(&self, mutation: Mutation) -> Result<Outcome, ServiceError> {
        call(&self.session_channel, "SessionService", |response| {
            SessionRequest::Submit { mutation, response }
        })
        .await?
    }

    pub async fn view(&self) -> Result<SessionView, ServiceError> {
        call(&self.session_channel, "SessionService", |response| {
            SessionRequest::View { response }
        })
        .await
    }

    pub async fn abandon(&self) -> Result<(), ServiceError> {
        self.session_channel
            .send(SessionRequest::Abandon)
            .await
            .map_err(|e| ServiceError::Communication("SessionService".to_string(), e.to_string()))
    }
}
