//! Point rules of the loyalty program.
//!
//! Purchases earn 5% of the amount, rounded up, with a floor of one point.
//! Redemptions must stay within the balance the terminal last saw. Both checks
//! are advisory: the ledger applies its own rules and has the final word.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 0.05 points per unit of currency.
pub const ACCRUAL_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
pub const MINIMUM_POINTS: i64 = 1;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0:?} is not a number")]
    NotANumber(String),
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,
    #[error("Amount is too large")]
    AmountOutOfRange,
    #[error("At least one point must be redeemed")]
    BelowMinimum,
    #[error("Cannot redeem {requested} points, only {available} available")]
    ExceedsBalance { requested: i64, available: i64 },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid phone number {0:?}: expected +52 followed by 10 digits")]
    InvalidPhone(String),
    #[error("Invalid email address {0:?}")]
    InvalidEmail(String),
    #[error("No customer is open in this session")]
    NoActiveCustomer,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NotANumber(_) => "NOT_A_NUMBER",
            ValidationError::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            ValidationError::AmountOutOfRange => "AMOUNT_OUT_OF_RANGE",
            ValidationError::BelowMinimum => "BELOW_MINIMUM",
            ValidationError::ExceedsBalance { .. } => "EXCEEDS_BALANCE",
            ValidationError::MissingField(_) => "MISSING_FIELD",
            ValidationError::InvalidPhone(_) => "INVALID_PHONE",
            ValidationError::InvalidEmail(_) => "INVALID_EMAIL",
            ValidationError::NoActiveCustomer => "NO_ACTIVE_CUSTOMER",
        }
    }
}

/// Parses a purchase amount typed by a waiter.
pub fn parse_amount(raw: &str) -> Result<Decimal, ValidationError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| ValidationError::NotANumber(raw.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }

    Ok(amount)
}

/// Parses a point count typed by a waiter. Fractions are not numbers here.
pub fn parse_points(raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::NotANumber(raw.to_string()))
}

/// Points earned by a purchase: `max(1, ceil(amount * 0.05))`.
pub fn accrual(amount: Decimal) -> Result<i64, ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }

    let points = amount
        .checked_mul(ACCRUAL_RATE)
        .map(|p| p.ceil())
        .and_then(|p| p.to_i64())
        .ok_or(ValidationError::AmountOutOfRange)?;

    Ok(points.max(MINIMUM_POINTS))
}

pub fn validate_redemption(points: i64, available: i64) -> Result<(), ValidationError> {
    if points < MINIMUM_POINTS {
        return Err(ValidationError::BelowMinimum);
    }
    if points > available {
        return Err(ValidationError::ExceedsBalance {
            requested: points,
            available,
        });
    }

    Ok(())
}

/// Same as [`validate_redemption`] for raw form input.
pub fn validate_redemption_input(raw: &str, available: i64) -> Result<i64, ValidationError> {
    let points = parse_points(raw)?;
    validate_redemption(points, available)?;
    Ok(points)
}

/// What the terminal shows before a purchase is confirmed. `projected_balance`
/// is only a hint; the balance displayed afterwards always comes from the
/// ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PurchasePreview {
    pub amount: Decimal,
    pub points: i64,
    pub projected_balance: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedemptionPreview {
    pub points: i64,
    pub projected_balance: i64,
}

pub fn preview_purchase(amount: Decimal, balance: i64) -> Result<PurchasePreview, ValidationError> {
    let points = accrual(amount)?;

    Ok(PurchasePreview {
        amount,
        points,
        projected_balance: balance.saturating_add(points),
    })
}

pub fn preview_redemption(points: i64, balance: i64) -> Result<RedemptionPreview, ValidationError> {
    validate_redemption(points, balance)?;

    Ok(RedemptionPreview {
        points,
        projected_balance: balance - points,
    })
}
