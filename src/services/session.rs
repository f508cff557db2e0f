//! The waiter's session with one customer.
//!
//! A session holds the last customer record fetched from the ledger and runs
//! point mutations against it:
//!
//! ```text
//! Idle -> Submitting -> Refreshing -> Idle
//!                    \-> (failure) -> Idle
//! ```
//!
//! The balance shown to the waiter only ever comes from a record the ledger
//! returned. After every acknowledged mutation the customer is fetched again
//! and the snapshot is replaced as a whole; nothing here adds or subtracts
//! points locally, and a session never accepts a customer record from its
//! caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::points::{self, ValidationError};
use super::{customers, RequestHandler, Service, ServiceError};
use crate::models::{
    customers::{Customer, CustomerLookup},
    identifiers::{self, token_for, QrToken},
    transactions::{PurchaseRequest, RedemptionRequest, Transaction},
};
use crate::repositories::LedgerRepository;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Refreshing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Purchase { amount: Decimal, description: String },
    Redemption { points: i64, description: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The ledger accepted the mutation and `customer` is the record fetched
    /// right after it.
    Applied {
        transaction: Transaction,
        customer: Customer,
    },
    /// The session was closed or moved to another customer while the request
    /// was in flight. The ledger may still have applied it.
    Discarded,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionView {
    pub phase: Phase,
    pub customer: Option<Customer>,
}

struct SessionState {
    phase: Phase,
    /// Epoch in which the current `phase` was entered. A phase left over
    /// from an earlier epoch reads as `Idle`.
    claim: u64,
    /// Bumped whenever the session is closed or switched to another customer.
    epoch: u64,
    /// Ticket of the most recently issued open.
    latest_open: u64,
    customer: Option<Customer>,
}

impl SessionState {
    fn phase(&self) -> Phase {
        if self.claim == self.epoch {
            self.phase
        } else {
            Phase::Idle
        }
    }
}

/// A lookup with its input already checked.
enum Resolved {
    Token(QrToken),
    Phone(String),
}

pub struct Session {
    ledger: Arc<dyn LedgerRepository>,
    state: Mutex<SessionState>,
}

/// Puts the session back to `Idle` however the submission ends, unless the
/// session has since moved on to another interaction.
struct InFlight<'a> {
    session: &'a Session,
    epoch: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state();
        if state.claim == self.epoch {
            state.phase = Phase::Idle;
        }
    }
}

impl Session {
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Session {
            ledger,
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                claim: 0,
                epoch: 0,
                latest_open: 0,
                customer: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn view(&self) -> SessionView {
        let state = self.state();
        SessionView {
            phase: state.phase(),
            customer: state.customer.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    pub fn snapshot(&self) -> Option<Customer> {
        self.state().customer.clone()
    }

    /// Looks the customer up and makes it the session's customer.
    ///
    /// The most recently issued open wins. Returns `Ok(None)` when a later
    /// open or a close overtook this one. On failure the previous customer
    /// stays in place.
    pub async fn open(&self, lookup: &CustomerLookup) -> Result<Option<Customer>, ServiceError> {
        let resolved = match lookup {
            CustomerLookup::Token(raw) => Resolved::Token(token_for(&identifiers::resolve(raw)?)),
            CustomerLookup::Phone(raw) => Resolved::Phone(customers::normalize_phone(raw)?),
            CustomerLookup::Id(id) => {
                id.validate()?;
                Resolved::Token(token_for(id))
            }
        };

        let (epoch, ticket) = {
            let mut state = self.state();
            state.latest_open += 1;
            (state.epoch, state.latest_open)
        };

        let customer = match &resolved {
            Resolved::Token(token) => self.ledger.find_by_token(token).await?,
            Resolved::Phone(phone) => self.ledger.find_by_phone(phone).await?,
        };

        let mut state = self.state();
        if state.epoch != epoch || state.latest_open != ticket {
            log::info!("Discarding lookup of customer {}: session moved on.", customer.id);
            return Ok(None);
        }

        log::info!("Opened session for customer {} ({}).", customer.id, customer.name);
        state.epoch += 1;
        state.customer = Some(customer.clone());
        Ok(Some(customer))
    }

    /// Closes the session. Anything still in flight completes on the ledger
    /// but its result is thrown away.
    pub fn abandon(&self) {
        let mut state = self.state();
        state.epoch += 1;
        if let Some(customer) = state.customer.take() {
            log::info!("Closed session for customer {}.", customer.id);
        }
    }

    /// Validates `mutation` against the current snapshot and claims the
    /// session for it.
    fn begin(&self, mutation: &Mutation) -> Result<(QrToken, u64), ServiceError> {
        let mut state = self.state();
        if state.phase() != Phase::Idle {
            return Err(ServiceError::Busy);
        }

        let customer = state
            .customer
            .as_ref()
            .ok_or(ValidationError::NoActiveCustomer)?;

        match mutation {
            Mutation::Purchase { amount, .. } => {
                let expected = points::accrual(*amount)?;
                log::info!(
                    "Submitting purchase of {} for customer {} (expecting {} points).",
                    amount,
                    customer.id,
                    expected
                );
            }
            Mutation::Redemption {
                points: requested, ..
            } => {
                points::validate_redemption(*requested, customer.points)?;
                log::info!(
                    "Submitting redemption of {} points for customer {}.",
                    requested,
                    customer.id
                );
            }
        }

        let token = customer.token();
        state.phase = Phase::Submitting;
        state.claim = state.epoch;
        Ok((token, state.epoch))
    }

    async fn send(&self, token: &QrToken, mutation: &Mutation) -> Result<Transaction, ServiceError> {
        let result = match mutation {
            Mutation::Purchase {
                amount,
                description,
            } => {
                let request = PurchaseRequest {
                    qr_data: token.clone(),
                    monto: *amount,
                    descripcion: description.clone(),
                };
                self.ledger.record_purchase(&request).await
            }
            Mutation::Redemption {
                points,
                description,
            } => {
                let request = RedemptionRequest {
                    qr_data: token.clone(),
                    puntos_a_canjear: *points,
                    descripcion: description.clone(),
                };
                self.ledger.redeem_points(&request).await
            }
        };

        result.map_err(|e| {
            log::warn!("Ledger refused mutation for {}: {}", token, e);
            ServiceError::from(e)
        })
    }

    pub async fn submit(&self, mutation: Mutation) -> Result<Outcome, ServiceError> {
        let (token, epoch) = self.begin(&mutation)?;
        let _in_flight = InFlight {
            session: self,
            epoch,
        };

        let transaction = self.send(&token, &mutation).await?;

        {
            let mut state = self.state();
            if state.claim == epoch {
                state.phase = Phase::Refreshing;
            }
        }
        let customer = self.ledger.find_by_token(&token).await.map_err(|e| {
            log::error!(
                "Mutation for {} was acknowledged but the refresh failed: {}",
                token,
                e
            );
            ServiceError::from(e)
        })?;

        let applied = {
            let mut state = self.state();
            if state.epoch == epoch {
                state.customer = Some(customer.clone());
                true
            } else {
                false
            }
        };

        if !applied {
            log::info!("Discarding result for {}: session moved on.", token);
            return Ok(Outcome::Discarded);
        }

        log::info!("Customer {} now has {} points.", customer.id, customer.points);
        Ok(Outcome::Applied {
            transaction,
            customer,
        })
    }
}

pub enum SessionRequest {
    Open {
        lookup: CustomerLookup,
        response: oneshot::Sender<Result<Option<Customer>, ServiceError>>,
    },
    Submit {
        mutation: Mutation,
        response: oneshot::Sender<Result<Outcome, ServiceError>>,
    },
    View {
        response: oneshot::Sender<SessionView>,
    },
    Abandon,
}

#[derive(Clone)]
pub struct SessionRequestHandler {
    session: Arc<Session>,
}

impl SessionRequestHandler {
    pub fn new(session: Arc<Session>) -> Self {
        SessionRequestHandler { session }
    }
}

#[async_trait]
impl RequestHandler<SessionRequest> for SessionRequestHandler {
    async fn handle_request(&self, request: SessionRequest) {
        match request {
            SessionRequest::Open { lookup, response } => {
                let customer = self.session.open(&lookup).await;
                let _ = response.send(customer);
            }
            SessionRequest::Submit { mutation, response } => {
                let outcome = self.session.submit(mutation).await;
                let _ = response.send(outcome);
            }
            SessionRequest::View { response } => {
                let _ = response.send(self.session.view());
            }
            SessionRequest::Abandon => self.session.abandon(),
        }
    }
}

pub struct SessionService;

impl SessionService {
    pub fn new() -> Self {
        SessionService {}
    }
}

#[async_trait]
impl Service<SessionRequest, SessionRequestHandler> for SessionService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identifiers::CustomerId;
    use crate::models::customers::NewCustomer;
    use crate::repositories::LedgerError;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn customer(id: &str, points: i64) -> Customer {
        Customer {
            id: CustomerId::new(id),
            name: "Juan Pérez".to_string(),
            phone: "+525512345678".to_string(),
            email: None,
            points,
            registered_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            qr_image_url: None,
        }
    }

    fn purchase(amount: &str) -> Mutation {
        Mutation::Purchase {
            amount: amount.parse().unwrap(),
            description: String::new(),
        }
    }

    /// Scripted ledger. Lookups pop from `lookups` in order; the first lookup
    /// opens the session, the next one is the refresh.
    #[derive(Default)]
    struct ScriptedLedger {
        lookups: Mutex<Vec<Result<Customer, LedgerError>>>,
        mutation_fails: bool,
        /// When set, mutations wait for this before answering.
        hold: Option<Arc<Notify>>,
        log: Mutex<Vec<String>>,
        mutations: AtomicUsize,
    }

    impl ScriptedLedger {
        fn with_lookups(lookups: Vec<Result<Customer, LedgerError>>) -> Self {
            let mut lookups = lookups;
            lookups.reverse();
            ScriptedLedger {
                lookups: Mutex::new(lookups),
                ..Default::default()
            }
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn next_lookup(&self) -> Result<Customer, LedgerError> {
            self.lookups
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(LedgerError::NotFound("no more lookups".to_string())))
        }

        async fn mutate(&self, entry: String) -> Result<Transaction, LedgerError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.record(entry);
            if self.mutation_fails {
                return Err(LedgerError::Server {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }
            Ok(serde_json::from_value(serde_json::json!({"id": 1, "tipo": "compra"})).unwrap())
        }
    }

    #[async_trait]
    impl LedgerRepository for ScriptedLedger {
        async fn register_customer(&self, _: &NewCustomer) -> Result<Customer, LedgerError> {
            unimplemented!()
        }

        async fn find_by_phone(&self, phone: &str) -> Result<Customer, LedgerError> {
            self.record(format!("phone {phone}"));
            self.next_lookup()
        }

        async fn find_by_token(&self, token: &QrToken) -> Result<Customer, LedgerError> {
            self.record(format!("lookup {token}"));
            self.next_lookup()
        }

        async fn search_by_name(&self, _: &str) -> Result<Vec<Customer>, LedgerError> {
            unimplemented!()
        }

        async fn record_purchase(&self, request: &PurchaseRequest) -> Result<Transaction, LedgerError> {
            self.mutate(format!("purchase {} {}", request.qr_data, request.monto))
                .await
        }

        async fn redeem_points(
            &self,
            request: &RedemptionRequest,
        ) -> Result<Transaction, LedgerError> {
            self.mutate(format!("redeem {} {}", request.qr_data, request.puntos_a_canjear))
                .await
        }

        async fn list_transactions(&self, _: &CustomerId) -> Result<Vec<Transaction>, LedgerError> {
            unimplemented!()
        }
    }

    async fn opened(ledger: ScriptedLedger) -> (Arc<ScriptedLedger>, Arc<Session>) {
        let ledger = Arc::new(ledger);
        let session = Arc::new(Session::new(ledger.clone()));
        session
            .open(&CustomerLookup::Token("TIOWICHO:42".to_string()))
            .await
            .unwrap();
        (ledger, session)
    }

    #[tokio::test]
    async fn balance_comes_from_refresh() {
        let (ledger, session) =
            opened(ScriptedLedger::with_lookups(vec![Ok(customer("42", 20)), Ok(customer("42", 30))]))
                .await;

        let outcome = session.submit(purchase("200.00")).await.unwrap();

        match outcome {
            Outcome::Applied { customer, .. } => assert_eq!(customer.points, 30),
            Outcome::Discarded => panic!("result discarded"),
        }
        assert_eq!(session.snapshot().unwrap().points, 30);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(
            *ledger.log.lock().unwrap(),
            vec![
                "lookup TIOWICHO:42".to_string(),
                "purchase TIOWICHO:42 200.00".to_string(),
                "lookup TIOWICHO:42".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn refresh_wins_over_local_arithmetic() {
        // The ledger applied a cap the terminal cannot know about.
        let (_, session) =
            opened(ScriptedLedger::with_lookups(vec![Ok(customer("42", 20)), Ok(customer("42", 21))]))
                .await;

        session.submit(purchase("1000.00")).await.unwrap();

        assert_eq!(session.snapshot().unwrap().points, 21);
    }

    #[tokio::test]
    async fn failed_mutation_leaves_snapshot_untouched() {
        let mut ledger = ScriptedLedger::with_lookups(vec![Ok(customer("42", 20))]);
        ledger.mutation_fails = true;
        let (ledger, session) = opened(ledger).await;
        let before = session.snapshot();

        let err = session.submit(purchase("200.00")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Transport(_)), "{err:?}");
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.phase(), Phase::Idle);
        // No refresh after a failed mutation.
        assert_eq!(ledger.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_snapshot_untouched() {
        let (_, session) = opened(ScriptedLedger::with_lookups(vec![
            Ok(customer("42", 20)),
            Err(LedgerError::Server {
                status: 502,
                message: "Bad Gateway".to_string(),
            }),
        ]))
        .await;
        let before = session.snapshot();

        let err = session.submit(purchase("200.00")).await.unwrap_err();

        assert_eq!(err.code(), "TRANSPORT");
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn invalid_redemption_never_reaches_ledger() {
        let (ledger, session) =
            opened(ScriptedLedger::with_lookups(vec![Ok(customer("42", 100))])).await;

        for (points, code) in [(150, "EXCEEDS_BALANCE"), (0, "BELOW_MINIMUM")] {
            let err = session
                .submit(Mutation::Redemption {
                    points,
                    description: String::new(),
                })
                .await
                .unwrap_err();
            assert_eq!(err.code(), code);
        }

        assert_eq!(ledger.mutations.load(Ordering::SeqCst), 0);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn redemption_up_to_balance_is_submitted() {
        let (ledger, session) = opened(ScriptedLedger::with_lookups(vec![
            Ok(customer("42", 100)),
            Ok(customer("42", 0)),
        ]))
        .await;

        session
            .submit(Mutation::Redemption {
                points: 100,
                description: "Postre".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.snapshot().unwrap().points, 0);
        assert!(ledger
            .log
            .lock()
            .unwrap()
            .contains(&"redeem TIOWICHO:42 100".to_string()));
    }

    #[tokio::test]
    async fn submit_without_customer_is_rejected() {
        let session = Session::new(Arc::new(ScriptedLedger::default()));

        let err = session.submit(purchase("10")).await.unwrap_err();

        assert_eq!(err.code(), "NO_ACTIVE_CUSTOMER");
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_submission() {
        let (ledger, session) =
            opened(ScriptedLedger::with_lookups(vec![Ok(customer("42", 20))])).await;

        let err = session.submit(purchase("0")).await.unwrap_err();

        assert_eq!(err.code(), "NON_POSITIVE_AMOUNT");
        assert_eq!(ledger.mutations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_submission_while_in_flight_is_busy() {
        let hold = Arc::new(Notify::new());
        let mut ledger =
            ScriptedLedger::with_lookups(vec![Ok(customer("42", 20)), Ok(customer("42", 30))]);
        ledger.hold = Some(hold.clone());
        let (ledger, session) = opened(ledger).await;

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit(purchase("200.00")).await }
        });
        while ledger.mutations.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.phase(), Phase::Submitting);

        let err = session.submit(purchase("50.00")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Busy));
        assert_eq!(session.snapshot().unwrap().points, 20);

        hold.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(session.snapshot().unwrap().points, 30);
        assert_eq!(ledger.mutations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_submission_is_discarded() {
        let hold = Arc::new(Notify::new());
        let mut ledger =
            ScriptedLedger::with_lookups(vec![Ok(customer("42", 20)), Ok(customer("42", 30))]);
        ledger.hold = Some(hold.clone());
        let (ledger, session) = opened(ledger).await;

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.submit(purchase("200.00")).await }
        });
        while ledger.mutations.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        session.abandon();
        hold.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), Outcome::Discarded);
        assert_eq!(session.snapshot(), None);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn failed_open_keeps_previous_customer() {
        let (_, session) = opened(ScriptedLedger::with_lookups(vec![
            Ok(customer("42", 20)),
            Err(LedgerError::NotFound("Cliente no encontrado".to_string())),
        ]))
        .await;

        let err = session
            .open(&CustomerLookup::Id(CustomerId::new("99")))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(session.snapshot().unwrap().id, CustomerId::new("42"));
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_before_lookup() {
        let ledger = Arc::new(ScriptedLedger::default());
        let session = Session::new(ledger.clone());

        let err = session
            .open(&CustomerLookup::Token("BADTOKEN".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "MALFORMED_IDENTIFIER");
        assert!(ledger.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn opens_by_normalized_phone() {
        let ledger = Arc::new(ScriptedLedger::with_lookups(vec![Ok(customer("42", 20))]));
        let session = Session::new(ledger.clone());

        session
            .open(&CustomerLookup::Phone("55 1234 5678".to_string()))
            .await
            .unwrap();

        assert_eq!(*ledger.log.lock().unwrap(), vec!["phone +525512345678".to_string()]);
        assert_eq!(session.snapshot().unwrap().points, 20);
    }

    #[tokio::test]
    async fn non_numeric_id_is_rejected_before_lookup() {
        let ledger = Arc::new(ScriptedLedger::default());
        let session = Session::new(ledger.clone());

        for raw in ["", "abc", "TIOWICHO:42"] {
            let err = session
                .open(&CustomerLookup::Id(CustomerId::new(raw)))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "MALFORMED_IDENTIFIER", "{raw:?}");
        }

        assert!(ledger.log.lock().unwrap().is_empty());
    }

    /// Answers each token lookup only once its gate is opened.
    struct GatedLookups {
        gates: Vec<(String, Arc<Notify>)>,
        started: AtomicUsize,
    }

    #[async_trait]
    impl LedgerRepository for GatedLookups {
        async fn register_customer(&self, _: &NewCustomer) -> Result<Customer, LedgerError> {
            unimplemented!()
        }

        async fn find_by_phone(&self, _: &str) -> Result<Customer, LedgerError> {
            unimplemented!()
        }

        async fn find_by_token(&self, token: &QrToken) -> Result<Customer, LedgerError> {
            let id = token.customer_id();
            let gate = self
                .gates
                .iter()
                .find(|(gated, _)| gated.as_str() == id.as_str())
                .map(|(_, gate)| gate.clone());
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(customer(id.as_str(), 10))
        }

        async fn search_by_name(&self, _: &str) -> Result<Vec<Customer>, LedgerError> {
            unimplemented!()
        }

        async fn record_purchase(&self, _: &PurchaseRequest) -> Result<Transaction, LedgerError> {
            unimplemented!()
        }

        async fn redeem_points(&self, _: &RedemptionRequest) -> Result<Transaction, LedgerError> {
            unimplemented!()
        }

        async fn list_transactions(&self, _: &CustomerId) -> Result<Vec<Transaction>, LedgerError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn latest_open_wins_when_earlier_answers_first() {
        let first_gate = Arc::new(Notify::new());
        let second_gate = Arc::new(Notify::new());
        let ledger = Arc::new(GatedLookups {
            gates: vec![
                ("1".to_string(), first_gate.clone()),
                ("2".to_string(), second_gate.clone()),
            ],
            started: AtomicUsize::new(0),
        });
        let session = Arc::new(Session::new(ledger.clone()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.open(&CustomerLookup::Token("TIOWICHO:1".to_string())).await }
        });
        while ledger.started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let session = session.clone();
            async move { session.open(&CustomerLookup::Token("TIOWICHO:2".to_string())).await }
        });
        while ledger.started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        first_gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), None);
        assert_eq!(session.snapshot(), None);

        second_gate.notify_one();
        let opened = second.await.unwrap().unwrap().unwrap();
        assert_eq!(opened.id, CustomerId::new("2"));
        assert_eq!(session.snapshot().unwrap().id, CustomerId::new("2"));
    }

    #[tokio::test]
    async fn latest_open_wins_when_it_answers_first() {
        let first_gate = Arc::new(Notify::new());
        let ledger = Arc::new(GatedLookups {
            gates: vec![("1".to_string(), first_gate.clone())],
            started: AtomicUsize::new(0),
        });
        let session = Arc::new(Session::new(ledger.clone()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.open(&CustomerLookup::Token("TIOWICHO:1".to_string())).await }
        });
        while ledger.started.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        let second = session
            .open(&CustomerLookup::Token("TIOWICHO:2".to_string()))
            .await
            .unwrap();
        assert_eq!(second.unwrap().id, CustomerId::new("2"));

        first_gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), None);
        assert_eq!(session.snapshot().unwrap().id, CustomerId::new("2"));
    }

    #[tokio::test]
    async fn abandoned_submission_does_not_block_the_next_customer() {
        let hold = Arc::new(Notify::new());
        let mut ledger = ScriptedLedger::with_lookups(vec![
            Ok(customer("42", 20)),
            Ok(customer("42", 20)),
            Ok(customer("42", 30)),
            Ok(customer("42", 40)),
        ]);
        ledger.hold = Some(hold.clone());
        let (ledger, session) = opened(ledger).await;

        let abandoned = tokio::spawn({
            let session = session.clone();
            async move { session.submit(purchase("200.00")).await }
        });
        while ledger.mutations.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        session.abandon();
        session
            .open(&CustomerLookup::Token("TIOWICHO:42".to_string()))
            .await
            .unwrap();
        assert_eq!(session.phase(), Phase::Idle);

        let current = tokio::spawn({
            let session = session.clone();
            async move { session.submit(purchase("200.00")).await }
        });
        while ledger.mutations.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.phase(), Phase::Submitting);

        hold.notify_one();
        assert_eq!(abandoned.await.unwrap().unwrap(), Outcome::Discarded);
        // The abandoned request finishing must not release the current one.
        assert_eq!(session.phase(), Phase::Submitting);

        hold.notify_one();
        let outcome = current.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Applied { customer, .. } if customer.points == 40));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.snapshot().unwrap().points, 40);
    }
}
