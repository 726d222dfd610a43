//! Storage contracts consumed by the unlock engine, the read service and the
//! account/audit endpoints.
//!
//! `db_storage` implements them on PostgreSQL, `memory_store` in process.

use crate::errors::AppError;
use crate::models::{
    AuditEntry, AuditLogRecord, CandidateContact, CandidateListFilter, CandidateRow, Company,
    HrUser, QuotaDetail, QuotaRow, SkillRow,
};
use async_trait::async_trait;

/// Candidate profile storage plus the unlock transaction.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Resolve an active candidate's id from its public slug.
    async fn find_candidate_id_by_slug(&self, slug: &str) -> Result<Option<i64>, AppError>;

    /// Open the transaction that serializes unlocks for one company.
    async fn begin_unlock(&self) -> Result<Box<dyn UnlockTx>, AppError>;

    /// Contact row for a candidate, `None` when the candidate has none.
    async fn get_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>, AppError>;

    /// Skills for exactly `candidate_ids`, ordered by candidate then name.
    async fn list_skills(&self, candidate_ids: &[i64]) -> Result<Vec<SkillRow>, AppError>;

    /// One page of active candidates, most recently updated first.
    async fn list_candidates_page(
        &self,
        filter: &CandidateListFilter,
    ) -> Result<Vec<CandidateRow>, AppError>;

    /// An active candidate with the unlocked flag computed for `company_id`.
    async fn get_candidate_with_unlock_flag(
        &self,
        company_id: i64,
        slug: &str,
    ) -> Result<Option<CandidateRow>, AppError>;
}

/// The unlock transaction.
///
/// Dropping a transaction that was not committed rolls it back. After `commit`
/// or `rollback` every further call fails.
#[async_trait]
pub trait UnlockTx: Send {
    /// Row-locking read of the company's quota. `None` means no ledger row.
    async fn lock_quota_row(&mut self, company_id: i64) -> Result<Option<QuotaRow>, AppError>;

    /// Insert the contact unlock unless it already exists. Returns whether a row
    /// was inserted.
    async fn insert_unlock_if_absent(
        &mut self,
        company_id: i64,
        hr_user_id: i64,
        candidate_id: i64,
    ) -> Result<bool, AppError>;

    async fn increment_quota_used(&mut self, company_id: i64, delta: i32)
        -> Result<(), AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

/// HR account lookups for the account summary.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_hr_user(&self, hr_user_id: i64) -> Result<Option<HrUser>, AppError>;

    async fn get_company(&self, company_id: i64) -> Result<Option<Company>, AppError>;

    /// Non-locking quota read.
    async fn get_quota(&self, company_id: i64) -> Result<Option<QuotaDetail>, AppError>;
}

/// Audit log persistence.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AppError>;

    /// Newest first.
    async fn list(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogRecord>, AppError>;
}

/// Escapes `LIKE` wildcards so user input matches literally.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
