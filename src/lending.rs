//! Simulated lending pool position and its derived economics.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const COLLATERAL_FACTOR: f64 = 0.8;
pub const BORROW_SPREAD_PCT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LendingError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("Insufficient collateral: requested {requested}, available {available}")]
    InsufficientCollateral { requested: f64, available: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingPool {
    pub total_lent: f64,
    pub total_borrowed: f64,
    pub current_apy: f64,
    pub user_lent: f64,
    pub user_borrowed: f64,
}

impl Default for LendingPool {
    fn default() -> Self {
        Self {
            total_lent: 1_250_000.0,
            total_borrowed: 875_000.0,
            current_apy: 8.5,
            user_lent: 0.0,
            user_borrowed: 0.0,
        }
    }
}

/// Health factor as a ratio; infinite when nothing is borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HealthFactor {
    Infinite,
    Ratio(f64),
}

impl HealthFactor {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Infinite => f64::INFINITY,
            Self::Ratio(ratio) => ratio,
        }
    }
}

impl LendingPool {
    pub fn lend(&mut self, amount: f64) -> Result<(), LendingError> {
        ensure_positive(amount)?;
        self.user_lent += amount;
        self.total_lent += amount;
        info!(component = "lending", event = "lending.lend", amount);
        Ok(())
    }

    pub fn borrow(&mut self, amount: f64) -> Result<(), LendingError> {
        ensure_positive(amount)?;
        let available = self.available_to_borrow();
        if amount > available {
            return Err(LendingError::InsufficientCollateral {
                requested: amount,
                available,
            });
        }
        self.user_borrowed += amount;
        self.total_borrowed += amount;
        info!(component = "lending", event = "lending.borrow", amount);
        Ok(())
    }

    pub fn max_borrowable(&self) -> f64 {
        max_borrowable(self.user_lent)
    }

    pub fn available_to_borrow(&self) -> f64 {
        (self.max_borrowable() - self.user_borrowed).max(0.0)
    }

    pub fn health_factor(&self) -> HealthFactor {
        health_factor(self.user_lent, self.user_borrowed)
    }

    pub fn utilization_pct(&self) -> f64 {
        if self.total_lent > 0.0 {
            self.total_borrowed / self.total_lent * 100.0
        } else {
            0.0
        }
    }

    pub fn user_annual_return(&self) -> f64 {
        annual_lending_return(self.user_lent, self.current_apy)
    }

    pub fn user_annual_interest(&self) -> f64 {
        annual_borrow_interest(self.user_borrowed, self.current_apy)
    }
}

fn ensure_positive(amount: f64) -> Result<(), LendingError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(LendingError::NonPositiveAmount(amount))
    }
}

pub fn annual_lending_return(principal: f64, apy: f64) -> f64 {
    principal * apy / 100.0
}

pub fn annual_borrow_interest(principal: f64, apy: f64) -> f64 {
    principal * (apy + BORROW_SPREAD_PCT) / 100.0
}

pub fn max_borrowable(user_lent: f64) -> f64 {
    user_lent * COLLATERAL_FACTOR
}

pub fn health_factor(user_lent: f64, user_borrowed: f64) -> HealthFactor {
    if user_borrowed <= 0.0 {
        HealthFactor::Infinite
    } else {
        HealthFactor::Ratio(user_lent * COLLATERAL_FACTOR / user_borrowed)
    }
}
