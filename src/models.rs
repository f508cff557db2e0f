pub mod customers;
pub mod identifiers;
pub mod transactions;
