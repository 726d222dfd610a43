//! Quota-gated contact unlocks.
//!
//! All unlocks for one company serialize on that company's quota row lock.
//! The unlock row is inserted before the ceiling is checked so that an
//! existing unlock is always honoured, even when the quota is exhausted; a
//! new unlock over the ceiling is rolled back together with its insert.
//!
//! When two requests race for the last unit, whichever locks the quota row
//! first wins. Under true concurrency that order is not predictable.

use crate::deadline::Deadline;
use crate::errors::AppError;
use crate::models::{UnlockOutcome, UnlockReceipt};
use crate::store::CandidateStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct UnlockEngine {
    store: Arc<dyn CandidateStore>,
}

impl UnlockEngine {
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self { store }
    }

    /// Reveals a candidate's contact to `company_id`, charging one quota unit
    /// the first time the pair is unlocked.
    pub async fn unlock_contact(
        &self,
        company_id: i64,
        hr_user_id: i64,
        slug: &str,
        deadline: Deadline,
    ) -> Result<UnlockReceipt, AppError> {
        deadline
            .run("unlock contact", async {
                let candidate_id = self
                    .store
                    .find_candidate_id_by_slug(slug)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("candidate {}", slug)))?;

                let outcome = self.charge(company_id, hr_user_id, candidate_id).await?;

                let contact = match self.store.get_contact(candidate_id).await? {
                    Some(contact) => contact,
                    None => {
                        tracing::warn!(
                            "Candidate {} unlocked by company {} has no contact row",
                            candidate_id,
                            company_id
                        );
                        Default::default()
                    }
                };

                tracing::info!(
                    company_id,
                    hr_user_id,
                    candidate_id,
                    outcome = ?outcome,
                    "Contact unlocked"
                );

                Ok(UnlockReceipt {
                    candidate_id,
                    outcome,
                    contact,
                })
            })
            .await
    }

    /// The unlock transaction. Returns whether this call performed the charge.
    async fn charge(
        &self,
        company_id: i64,
        hr_user_id: i64,
        candidate_id: i64,
    ) -> Result<UnlockOutcome, AppError> {
        let mut tx = self.store.begin_unlock().await?;

        let quota = tx
            .lock_quota_row(company_id)
            .await?
            .ok_or(AppError::QuotaNotConfigured(company_id))?;

        if !tx
            .insert_unlock_if_absent(company_id, hr_user_id, candidate_id)
            .await?
        {
            tx.commit().await?;
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        if !quota.has_remaining() {
            tx.rollback().await?;
            tracing::info!(
                company_id,
                candidate_id,
                used = quota.unlock_quota_used,
                total = quota.unlock_quota_total,
                "Unlock rejected, quota exhausted"
            );
            return Err(AppError::QuotaExceeded(company_id));
        }

        tx.increment_quota_used(company_id, 1).await?;
        tx.commit().await?;
        Ok(UnlockOutcome::Charged)
    }
}
