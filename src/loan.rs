//! Simulated gas-loan workflow: request -> swap -> repay -> completed.
//!
//! Submission and swap execution are synchronous transitions; the ledger
//! append and the swap settlement complete later on timers owned by the
//! workflow instance. Dropping the instance aborts any pending timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::token::TokenSnapshot;

pub const LEDGER_APPEND_DELAY_MS: u64 = 1_000;
pub const SWAP_SETTLE_DELAY_MS: u64 = 2_000;
pub const LEDGER_DISPLAY_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStage {
    /// No loan exists. Accepts the same input as `Request`.
    Idle,
    Request,
    Swap,
    Repay,
    Completed,
    Failed,
}

impl LoanStage {
    pub fn step_label(self) -> &'static str {
        match self {
            Self::Idle | Self::Request => "request",
            Self::Swap => "swap",
            Self::Repay => "repay",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn accepts_request(self) -> bool {
        matches!(self, Self::Idle | Self::Request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    pub borrower: String,
    pub principal: String,
    pub collateral_token: String,
    pub collateral_amount: String,
    pub created_at: i64,
    pub repaid: bool,
    /// Set when the loan was aborted; the collateral is considered released.
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDraft {
    pub principal: String,
    pub collateral_amount: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowConfig {
    pub ledger_append_delay_ms: u64,
    pub swap_settle_delay_ms: u64,
    /// Fee-currency units received per unit of collateral. Injected, never
    /// defaulted: there is no pricing oracle behind it.
    pub swap_rate: f64,
}

impl WorkflowConfig {
    pub fn new(swap_rate: f64) -> Self {
        Self {
            ledger_append_delay_ms: LEDGER_APPEND_DELAY_MS,
            swap_settle_delay_ms: SWAP_SETTLE_DELAY_MS,
            swap_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub estimated_output: f64,
    pub net_after_repay: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("principal must be a positive amount, got '{0}'")]
    InvalidPrincipal(String),
    #[error("collateral amount must be a positive amount, got '{0}'")]
    InvalidCollateralAmount(String),
    #[error("no collateral token has been resolved")]
    CollateralTokenUnresolved,
    #[error("no wallet connected")]
    WalletNotConnected,
    #[error("cannot {action} while the loan is in stage '{}'", .stage.step_label())]
    InvalidTransition {
        action: &'static str,
        stage: LoanStage,
    },
}

struct WorkflowState {
    stage: LoanStage,
    active: Option<Loan>,
    draft: LoanDraft,
    ledger: Vec<Loan>,
    timers: Vec<JoinHandle<()>>,
}

impl WorkflowState {
    fn track(&mut self, handle: JoinHandle<()>) {
        self.timers.retain(|timer| !timer.is_finished());
        self.timers.push(handle);
    }

    fn abort_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    fn ledger_entry(&mut self, loan: &Loan) -> &mut Loan {
        let index = match self.ledger.iter().position(|entry| entry.id == loan.id) {
            Some(index) => index,
            None => {
                self.ledger.push(loan.clone());
                self.ledger.len() - 1
            }
        };
        &mut self.ledger[index]
    }
}

/// Per-user workflow with at most one active loan.
pub struct LoanWorkflow {
    borrower: Option<String>,
    cfg: WorkflowConfig,
    sequence: AtomicU64,
    state: Arc<Mutex<WorkflowState>>,
}

impl LoanWorkflow {
    pub fn new(borrower: Option<String>, cfg: WorkflowConfig) -> Self {
        Self {
            borrower,
            cfg,
            sequence: AtomicU64::new(0),
            state: Arc::new(Mutex::new(WorkflowState {
                stage: LoanStage::Idle,
                active: None,
                draft: LoanDraft::default(),
                ledger: Vec::new(),
                timers: Vec::new(),
            })),
        }
    }

    pub fn config(&self) -> WorkflowConfig {
        self.cfg
    }

    pub fn stage(&self) -> LoanStage {
        self.lock().stage
    }

    pub fn active_loan(&self) -> Option<Loan> {
        self.lock().active.clone()
    }

    pub fn draft(&self) -> LoanDraft {
        self.lock().draft.clone()
    }

    /// Full ledger in insertion order.
    pub fn ledger(&self) -> Vec<Loan> {
        self.lock().ledger.clone()
    }

    /// Most recent entries first, capped for display.
    pub fn recent_ledger(&self) -> Vec<Loan> {
        self.lock()
            .ledger
            .iter()
            .rev()
            .take(LEDGER_DISPLAY_LIMIT)
            .cloned()
            .collect()
    }

    pub fn update_draft(
        &self,
        principal: impl Into<String>,
        collateral_amount: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        if !state.stage.accepts_request() {
            return Err(WorkflowError::InvalidTransition {
                action: "edit the request",
                stage: state.stage,
            });
        }
        state.draft = LoanDraft {
            principal: principal.into(),
            collateral_amount: collateral_amount.into(),
        };
        state.stage = LoanStage::Request;
        Ok(())
    }

    /// `Request --submit--> Swap`. Rejections leave all state untouched.
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        principal: &str,
        collateral_amount: &str,
        collateral: Option<&TokenSnapshot>,
    ) -> Result<Loan, WorkflowError> {
        let principal = principal.trim();
        let collateral_amount = collateral_amount.trim();

        let mut state = self.lock();
        if !state.stage.accepts_request() {
            return Err(WorkflowError::InvalidTransition {
                action: "submit a loan request",
                stage: state.stage,
            });
        }
        if parse_positive_amount(principal).is_none() {
            return Err(WorkflowError::InvalidPrincipal(principal.to_string()));
        }
        if parse_positive_amount(collateral_amount).is_none() {
            return Err(WorkflowError::InvalidCollateralAmount(
                collateral_amount.to_string(),
            ));
        }
        let token = collateral
            .filter(|token| token.valid)
            .ok_or(WorkflowError::CollateralTokenUnresolved)?;
        let borrower = self
            .borrower
            .clone()
            .ok_or(WorkflowError::WalletNotConnected)?;

        let created_at = Utc::now().timestamp_millis();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let loan = Loan {
            id: format!("{created_at}-{sequence}"),
            borrower,
            principal: principal.to_string(),
            collateral_token: token.address.clone(),
            collateral_amount: collateral_amount.to_string(),
            created_at,
            repaid: false,
            failure: None,
        };

        state.active = Some(loan.clone());
        state.draft = LoanDraft {
            principal: loan.principal.clone(),
            collateral_amount: loan.collateral_amount.clone(),
        };
        state.stage = LoanStage::Swap;

        let shared = Arc::clone(&self.state);
        let pending = loan.clone();
        let delay = Duration::from_millis(self.cfg.ledger_append_delay_ms);
        state.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock().expect("workflow lock should not be poisoned");
            state.ledger_entry(&pending);
            info!(
                component = "loan_workflow",
                event = "loan.ledger.appended",
                loan_id = %pending.id
            );
        }));

        info!(
            component = "loan_workflow",
            event = "loan.submitted",
            loan_id = %loan.id,
            principal = %loan.principal,
            collateral_token = %loan.collateral_token,
            collateral_amount = %loan.collateral_amount
        );

        Ok(loan)
    }

    /// `Swap --execute--> Repay`, then `Repay --auto--> Completed` once the
    /// settlement delay elapses. Must be called from within a tokio runtime.
    pub fn execute_swap(&self) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        let loan = match (state.stage, state.active.clone()) {
            (LoanStage::Swap, Some(loan)) => loan,
            (stage, _) => {
                return Err(WorkflowError::InvalidTransition {
                    action: "execute the swap",
                    stage,
                })
            }
        };
        state.stage = LoanStage::Repay;
        let loan_id = loan.id.clone();

        let shared = Arc::clone(&self.state);
        let delay = Duration::from_millis(self.cfg.swap_settle_delay_ms);
        state.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock().expect("workflow lock should not be poisoned");
            let still_active = state.stage == LoanStage::Repay
                && state.active.as_ref().is_some_and(|active| active.id == loan.id);
            if !still_active {
                return;
            }
            state.stage = LoanStage::Completed;
            if let Some(active) = state.active.as_mut() {
                active.repaid = true;
            }
            state.ledger_entry(&loan).repaid = true;
            info!(
                component = "loan_workflow",
                event = "loan.completed",
                loan_id = %loan.id
            );
        }));

        info!(
            component = "loan_workflow",
            event = "loan.swap.executed",
            loan_id = %loan_id
        );
        Ok(())
    }

    /// `Completed | Failed --acknowledge--> Idle`.
    pub fn acknowledge(&self) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        if !matches!(state.stage, LoanStage::Completed | LoanStage::Failed) {
            return Err(WorkflowError::InvalidTransition {
                action: "acknowledge completion",
                stage: state.stage,
            });
        }
        state.active = None;
        state.draft = LoanDraft::default();
        state.stage = LoanStage::Idle;
        state.timers.retain(|timer| !timer.is_finished());
        Ok(())
    }

    /// `Swap | Repay --fail--> Failed`. Pending timers are aborted and the
    /// ledger records the loan as failed with its collateral released.
    pub fn fail(&self, reason: impl Into<String>) -> Result<Loan, WorkflowError> {
        let reason = reason.into();
        let mut state = self.lock();
        let mut loan = match (state.stage, state.active.clone()) {
            (LoanStage::Swap | LoanStage::Repay, Some(loan)) => loan,
            (stage, _) => {
                return Err(WorkflowError::InvalidTransition {
                    action: "fail the loan",
                    stage,
                })
            }
        };

        state.abort_timers();
        loan.failure = Some(reason.clone());
        state.ledger_entry(&loan).failure = Some(reason.clone());
        state.active = Some(loan.clone());
        state.stage = LoanStage::Failed;

        warn!(
            component = "loan_workflow",
            event = "loan.failed",
            loan_id = %loan.id,
            reason = %reason
        );
        Ok(loan)
    }

    pub fn swap_quote(&self) -> Option<SwapQuote> {
        let loan = self.active_loan()?;
        swap_quote(&loan, self.cfg.swap_rate)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkflowState> {
        self.state
            .lock()
            .expect("workflow lock should not be poisoned")
    }
}

impl Drop for LoanWorkflow {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.abort_timers();
        }
    }
}

pub fn swap_quote(loan: &Loan, swap_rate: f64) -> Option<SwapQuote> {
    let collateral = parse_positive_amount(&loan.collateral_amount)?;
    let principal = parse_positive_amount(&loan.principal)?;
    let estimated_output = collateral * swap_rate;
    Some(SwapQuote {
        estimated_output,
        net_after_repay: estimated_output - principal,
    })
}

pub fn parse_positive_amount(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}
