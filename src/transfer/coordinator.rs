//! Saga Coordinator
//!
//! Drives the ordered step sequence with per-step retry and reverse-order
//! compensation. After every transition the saga snapshot and phase are
//! persisted on the transaction row, so a crashed coordinator leaves a
//! deterministic recovery record in the store.

use tracing::{debug, error, info, warn};

use crate::error::WalletError;
use crate::store::transactions;
use crate::transfer::TransferPhase;
use crate::transfer::saga::{SagaContext, SagaState, SagaStep, should_retry};

pub struct SagaCoordinator;

impl SagaCoordinator {
    /// Execute `steps` in order against `ctx`.
    ///
    /// On success the final step has already committed the terminal
    /// status. On failure the transaction row is left FAILED with the
    /// phase reflecting how far compensation got, and the original error
    /// is returned.
    pub async fn run(
        ctx: &mut SagaContext,
        steps: &[Box<dyn SagaStep>],
    ) -> Result<(), WalletError> {
        let mut state = SagaState::new();

        for (index, step) in steps.iter().enumerate() {
            state.current_step = index as i32;
            Self::persist_state(ctx, &state).await;

            if let Err(e) = Self::run_step(ctx, step.as_ref(), &mut state).await {
                state.record_error(step.name(), &e);
                Self::persist_state(ctx, &state).await;

                let terminal_phase = Self::compensate(ctx, steps, index, &mut state).await;
                Self::persist_state(ctx, &state).await;

                if let Err(mark_err) = transactions::mark_failed(
                    &ctx.pool,
                    ctx.tx.id,
                    terminal_phase,
                    e.code(),
                    &e.to_string(),
                )
                .await
                {
                    error!(
                        transaction_id = %ctx.tx.id,
                        error = %mark_err,
                        "Failed to record terminal failure"
                    );
                }
                ctx.tx.status = crate::models::TransactionStatus::Failed;
                ctx.tx.phase = terminal_phase;
                ctx.tx.error_code = Some(e.code().to_string());
                ctx.tx.error_message = Some(e.to_string());

                return Err(e);
            }

            state.record_completed(step.name());
            ctx.tx.phase = step.phase_on_success();
            if let Err(e) =
                transactions::set_phase(&ctx.pool, ctx.tx.id, step.phase_on_success()).await
            {
                warn!(
                    transaction_id = %ctx.tx.id,
                    step = step.name(),
                    error = %e,
                    "Phase persistence failed after step commit"
                );
            }
            Self::persist_state(ctx, &state).await;
        }

        info!(
            transaction_id = %ctx.tx.id,
            amount = %ctx.tx.amount,
            "Transfer completed"
        );
        Ok(())
    }

    /// Execute one step with its retry budget
    async fn run_step(
        ctx: &mut SagaContext,
        step: &dyn SagaStep,
        state: &mut SagaState,
    ) -> Result<(), WalletError> {
        let mut attempt: u32 = 0;

        loop {
            match step.execute(ctx).await {
                Ok(()) => {
                    debug!(
                        transaction_id = %ctx.tx.id,
                        step = step.name(),
                        "Step completed"
                    );
                    return Ok(());
                }
                Err(e) if should_retry(step, attempt, &e) => {
                    attempt += 1;
                    state.retry_count += 1;
                    ctx.tx.retry_count += 1;
                    warn!(
                        transaction_id = %ctx.tx.id,
                        step = step.name(),
                        attempt = attempt,
                        error = %e,
                        "Step failed, retrying"
                    );
                    if let Err(retry_err) =
                        transactions::increment_retry(&ctx.pool, ctx.tx.id).await
                    {
                        warn!(
                            transaction_id = %ctx.tx.id,
                            error = %retry_err,
                            "Retry count persistence failed"
                        );
                    }
                }
                Err(e) => {
                    info!(
                        transaction_id = %ctx.tx.id,
                        step = step.name(),
                        error_code = e.code(),
                        "Step failed terminally, entering compensation"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Undo completed steps in reverse order, best-effort.
    ///
    /// Returns the terminal phase: FAILED when nothing had to be undone,
    /// COMPENSATED when every inverse ran, COMPENSATION_PENDING when one
    /// or more inverses failed (surfaced by the recovery sweep).
    async fn compensate(
        ctx: &mut SagaContext,
        steps: &[Box<dyn SagaStep>],
        failed_index: usize,
        state: &mut SagaState,
    ) -> TransferPhase {
        if failed_index == 0 {
            return TransferPhase::Failed;
        }

        if let Err(e) =
            transactions::set_phase(&ctx.pool, ctx.tx.id, TransferPhase::CompensationPending).await
        {
            warn!(transaction_id = %ctx.tx.id, error = %e, "Compensation phase persistence failed");
        }

        let mut all_compensated = true;
        for step in steps[..failed_index].iter().rev() {
            match step.compensate(ctx).await {
                Ok(()) => {
                    state.record_compensated(step.name());
                    debug!(
                        transaction_id = %ctx.tx.id,
                        step = step.name(),
                        "Step compensated"
                    );
                }
                Err(e) => {
                    all_compensated = false;
                    // Operational alert: this transaction needs
                    // out-of-band reconciliation.
                    error!(
                        transaction_id = %ctx.tx.id,
                        step = step.name(),
                        error = %e,
                        "COMPENSATION FAILURE"
                    );
                }
            }
        }

        if all_compensated {
            TransferPhase::Compensated
        } else {
            TransferPhase::CompensationPending
        }
    }

    async fn persist_state(ctx: &SagaContext, state: &SagaState) {
        let value = match state.to_value() {
            Ok(v) => v,
            Err(e) => {
                warn!(transaction_id = %ctx.tx.id, error = %e, "Saga state serialization failed");
                return;
            }
        };
        if let Err(e) = transactions::set_saga_state(&ctx.pool, ctx.tx.id, &value).await {
            warn!(transaction_id = %ctx.tx.id, error = %e, "Saga state persistence failed");
        }
    }
}
