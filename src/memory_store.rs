//! In-process implementation of the storage traits.
//!
//! Mirrors the PostgreSQL semantics the core depends on: the quota row lock is
//! a per-company async mutex owned by the open transaction, writes made inside
//! a transaction become visible only on commit, and an un-committed
//! transaction is discarded when dropped.

use crate::errors::AppError;
use crate::models::{
    AuditEntry, AuditLogRecord, CandidateContact, CandidateListFilter, CandidateRow, Company,
    HrUser, QuotaDetail, QuotaRow, SkillRow,
};
use crate::store::{AccountStore, AuditSink, CandidateStore, UnlockTx};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

/// Candidate data used to seed the store.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub slug: String,
    pub display_name: String,
    pub desired_role: Option<String>,
    pub english_level: Option<String>,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub availability_days: Option<i32>,
    pub timezone: Option<String>,
    pub bc_experience: bool,
    pub summary: Option<String>,
    pub active: bool,
    pub skills: Vec<String>,
    pub contact: Option<CandidateContact>,
}

impl NewCandidate {
    /// An active candidate with only a slug and a display name.
    pub fn named(slug: &str, display_name: &str) -> Self {
        Self {
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            desired_role: None,
            english_level: None,
            salary_min: None,
            salary_max: None,
            availability_days: None,
            timezone: None,
            bc_experience: false,
            summary: None,
            active: true,
            skills: Vec::new(),
            contact: None,
        }
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_contact(mut self, contact: CandidateContact) -> Self {
        self.contact = Some(contact);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredCandidate {
    id: i64,
    data: NewCandidate,
    /// Monotonic stand-in for `updated_at`.
    updated_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct StoredQuota {
    total: i32,
    used: i32,
    period_start: Option<NaiveDate>,
    period_end: Option<NaiveDate>,
}

#[derive(Default)]
struct Data {
    next_id: i64,
    next_seq: u64,
    candidates: Vec<StoredCandidate>,
    quotas: HashMap<i64, StoredQuota>,
    /// `(company_id, candidate_id)` pairs with a contact unlock.
    unlocks: HashSet<(i64, i64)>,
    /// `(company_id, hr_user_id, candidate_id)` in commit order.
    unlock_log: Vec<(i64, i64, i64)>,
    hr_users: HashMap<i64, HrUser>,
    companies: HashMap<i64, Company>,
    audit: Vec<(i64, AuditLogRecord)>,
}

#[derive(Default)]
struct Faults {
    fail_increment: AtomicBool,
    fail_skills: AtomicBool,
    fail_commit: AtomicBool,
}

#[derive(Default)]
struct Shared {
    data: Mutex<Data>,
    quota_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    skill_queries: AtomicUsize,
    faults: Faults,
}

impl Shared {
    fn data(&self) -> MutexGuard<'_, Data> {
        // A panic while holding the lock cannot leave `Data` half-updated: every
        // mutation is a single insert or push.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn quota_lock(&self, company_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .quota_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(company_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// In-memory candidate, account and audit storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate and returns its id. Later additions count as more
    /// recently updated.
    pub fn add_candidate(&self, candidate: NewCandidate) -> i64 {
        let mut data = self.shared.data();
        data.next_id += 1;
        data.next_seq += 1;
        let id = data.next_id;
        let updated_seq = data.next_seq;
        data.candidates.push(StoredCandidate {
            id,
            data: candidate,
            updated_seq,
        });
        id
    }

    /// Marks a candidate as the most recently updated.
    pub fn touch(&self, candidate_id: i64) {
        let mut data = self.shared.data();
        data.next_seq += 1;
        let seq = data.next_seq;
        if let Some(c) = data.candidates.iter_mut().find(|c| c.id == candidate_id) {
            c.updated_seq = seq;
        }
    }

    /// Replaces a candidate's skills. Does not touch any cache.
    pub fn set_skills(&self, candidate_id: i64, skills: &[&str]) {
        let mut data = self.shared.data();
        if let Some(c) = data.candidates.iter_mut().find(|c| c.id == candidate_id) {
            c.data.skills = skills.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn set_quota(&self, company_id: i64, total: i32, used: i32) {
        self.shared.data().quotas.insert(
            company_id,
            StoredQuota {
                total,
                used,
                period_start: None,
                period_end: None,
            },
        );
    }

    pub fn set_quota_period(&self, company_id: i64, start: NaiveDate, end: NaiveDate) {
        if let Some(q) = self.shared.data().quotas.get_mut(&company_id) {
            q.period_start = Some(start);
            q.period_end = Some(end);
        }
    }

    /// Committed quota state.
    pub fn quota(&self, company_id: i64) -> Option<QuotaRow> {
        self.shared.data().quotas.get(&company_id).map(|q| QuotaRow {
            company_id,
            unlock_quota_total: q.total,
            unlock_quota_used: q.used,
        })
    }

    /// Committed unlock rows for a company.
    pub fn unlock_count(&self, company_id: i64) -> usize {
        self.shared
            .data()
            .unlocks
            .iter()
            .filter(|(company, _)| *company == company_id)
            .count()
    }

    pub fn is_unlocked(&self, company_id: i64, candidate_id: i64) -> bool {
        self.shared
            .data()
            .unlocks
            .contains(&(company_id, candidate_id))
    }

    /// HR user recorded on the unlock row, if any.
    pub fn unlocked_by(&self, company_id: i64, candidate_id: i64) -> Option<i64> {
        self.shared
            .data()
            .unlock_log
            .iter()
            .find(|(company, _, candidate)| *company == company_id && *candidate == candidate_id)
            .map(|(_, hr_user, _)| *hr_user)
    }

    pub fn add_company(&self, company: Company) {
        self.shared.data().companies.insert(company.id, company);
    }

    pub fn add_hr_user(&self, user: HrUser) {
        self.shared.data().hr_users.insert(user.id, user);
    }

    /// Number of `list_skills` calls served so far.
    pub fn skill_queries(&self) -> usize {
        self.shared.skill_queries.load(Ordering::SeqCst)
    }

    /// Audit entries recorded for a company, oldest first.
    pub fn audit_entries(&self, company_id: i64) -> Vec<AuditLogRecord> {
        self.shared
            .data()
            .audit
            .iter()
            .filter(|(company, _)| *company == company_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn fail_increments(&self, fail: bool) {
        self.shared.faults.fail_increment.store(fail, Ordering::SeqCst);
    }

    pub fn fail_skill_queries(&self, fail: bool) {
        self.shared.faults.fail_skills.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.shared.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    fn row_for(&self, data: &Data, candidate: &StoredCandidate, company_id: i64) -> CandidateRow {
        let c = &candidate.data;
        CandidateRow {
            id: candidate.id,
            public_slug: c.slug.clone(),
            display_name: c.display_name.clone(),
            desired_role: c.desired_role.clone(),
            english_level: c.english_level.clone(),
            expected_salary_min_cny: c.salary_min,
            expected_salary_max_cny: c.salary_max,
            availability_days: c.availability_days,
            timezone: c.timezone.clone(),
            bc_experience: c.bc_experience,
            summary: c.summary.clone(),
            unlocked_contact: data.unlocks.contains(&(company_id, candidate.id)),
        }
    }
}

fn matches_filter(c: &NewCandidate, filter: &CandidateListFilter) -> bool {
    if !c.active {
        return false;
    }
    if let Some(ref level) = filter.english_level {
        if c.english_level.as_deref() != Some(level.as_str()) {
            return false;
        }
    }
    if let Some(bc) = filter.bc_experience {
        if c.bc_experience != bc {
            return false;
        }
    }
    if let Some(max_days) = filter.availability_max {
        match c.availability_days {
            Some(days) if days <= max_days => {}
            _ => return false,
        }
    }
    if let (Some(min), Some(cand_max)) = (filter.salary_min, c.salary_max) {
        if cand_max < min {
            return false;
        }
    }
    if let (Some(max), Some(cand_min)) = (filter.salary_max, c.salary_min) {
        if cand_min > max {
            return false;
        }
    }
    if let Some(ref skill) = filter.skill {
        let wanted = skill.to_lowercase();
        if !c.skills.iter().any(|s| s.to_lowercase() == wanted) {
            return false;
        }
    }
    if let Some(ref q) = filter.q {
        let needle = q.to_lowercase();
        let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&needle));
        if !hit(Some(&c.display_name)) && !hit(c.desired_role.as_deref()) && !hit(c.summary.as_deref())
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl CandidateStore for MemoryStorage {
    async fn find_candidate_id_by_slug(&self, slug: &str) -> Result<Option<i64>, AppError> {
        Ok(self
            .shared
            .data()
            .candidates
            .iter()
            .find(|c| c.data.active && c.data.slug == slug)
            .map(|c| c.id))
    }

    async fn begin_unlock(&self) -> Result<Box<dyn UnlockTx>, AppError> {
        Ok(Box::new(MemoryUnlockTx {
            shared: Arc::clone(&self.shared),
            guard: None,
            pending_unlocks: Vec::new(),
            pending_increments: Vec::new(),
            finished: false,
        }))
    }

    async fn get_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>, AppError> {
        Ok(self
            .shared
            .data()
            .candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .and_then(|c| c.data.contact.clone()))
    }

    async fn list_skills(&self, candidate_ids: &[i64]) -> Result<Vec<SkillRow>, AppError> {
        self.shared.skill_queries.fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.fail_skills.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("skill query failed".into()));
        }

        let data = self.shared.data();
        let mut ids: Vec<i64> = candidate_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut rows = Vec::new();
        for id in ids {
            if let Some(c) = data.candidates.iter().find(|c| c.id == id) {
                let mut names = c.data.skills.clone();
                names.sort();
                rows.extend(names.into_iter().map(|name| SkillRow {
                    candidate_id: id,
                    name,
                }));
            }
        }
        Ok(rows)
    }

    async fn list_candidates_page(
        &self,
        filter: &CandidateListFilter,
    ) -> Result<Vec<CandidateRow>, AppError> {
        let data = self.shared.data();
        let mut matching: Vec<&StoredCandidate> = data
            .candidates
            .iter()
            .filter(|c| matches_filter(&c.data, filter))
            .collect();
        matching.sort_by(|a, b| {
            b.updated_seq
                .cmp(&a.updated_seq)
                .then_with(|| b.id.cmp(&a.id))
        });

        let offset = usize::try_from(filter.offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit.max(0)).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|c| self.row_for(&data, c, filter.company_id))
            .collect())
    }

    async fn get_candidate_with_unlock_flag(
        &self,
        company_id: i64,
        slug: &str,
    ) -> Result<Option<CandidateRow>, AppError> {
        let data = self.shared.data();
        Ok(data
            .candidates
            .iter()
            .find(|c| c.data.active && c.data.slug == slug)
            .map(|c| self.row_for(&data, c, company_id)))
    }
}

/// Buffered unlock transaction holding the company's quota lock.
struct MemoryUnlockTx {
    shared: Arc<Shared>,
    guard: Option<OwnedMutexGuard<()>>,
    pending_unlocks: Vec<(i64, i64, i64)>,
    pending_increments: Vec<(i64, i32)>,
    finished: bool,
}

impl MemoryUnlockTx {
    fn ensure_open(&self) -> Result<(), AppError> {
        if self.finished {
            return Err(AppError::InternalError(
                "unlock transaction already finished".into(),
            ));
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.pending_unlocks.clear();
        self.pending_increments.clear();
        self.guard = None;
        self.finished = true;
    }
}

#[async_trait]
impl UnlockTx for MemoryUnlockTx {
    async fn lock_quota_row(&mut self, company_id: i64) -> Result<Option<QuotaRow>, AppError> {
        self.ensure_open()?;
        if self.guard.is_none() {
            let lock = self.shared.quota_lock(company_id);
            self.guard = Some(lock.lock_owned().await);
        }

        let data = self.shared.data();
        Ok(data.quotas.get(&company_id).map(|q| {
            let pending: i32 = self
                .pending_increments
                .iter()
                .filter(|(company, _)| *company == company_id)
                .map(|(_, delta)| delta)
                .sum();
            QuotaRow {
                company_id,
                unlock_quota_total: q.total,
                unlock_quota_used: q.used + pending,
            }
        }))
    }

    async fn insert_unlock_if_absent(
        &mut self,
        company_id: i64,
        hr_user_id: i64,
        candidate_id: i64,
    ) -> Result<bool, AppError> {
        self.ensure_open()?;
        let exists = self.shared.data().unlocks.contains(&(company_id, candidate_id))
            || self
                .pending_unlocks
                .iter()
                .any(|(c, _, cand)| *c == company_id && *cand == candidate_id);
        if exists {
            return Ok(false);
        }
        self.pending_unlocks
            .push((company_id, hr_user_id, candidate_id));
        Ok(true)
    }

    async fn increment_quota_used(
        &mut self,
        company_id: i64,
        delta: i32,
    ) -> Result<(), AppError> {
        self.ensure_open()?;
        if self.shared.faults.fail_increment.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("quota increment failed".into()));
        }
        if !self.shared.data().quotas.contains_key(&company_id) {
            return Err(AppError::InternalError(format!(
                "quota row for company {} disappeared during unlock",
                company_id
            )));
        }
        self.pending_increments.push((company_id, delta));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.ensure_open()?;
        if self.shared.faults.fail_commit.load(Ordering::SeqCst) {
            self.discard();
            return Err(AppError::InternalError("commit failed".into()));
        }

        {
            let mut data = self.shared.data();
            for (company, hr_user, candidate) in self.pending_unlocks.drain(..) {
                data.unlocks.insert((company, candidate));
                data.unlock_log.push((company, hr_user, candidate));
            }
            for (company, delta) in self.pending_increments.drain(..) {
                if let Some(q) = data.quotas.get_mut(&company) {
                    q.used += delta;
                }
            }
        }
        self.discard();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.discard();
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStorage {
    async fn get_hr_user(&self, hr_user_id: i64) -> Result<Option<HrUser>, AppError> {
        Ok(self.shared.data().hr_users.get(&hr_user_id).cloned())
    }

    async fn get_company(&self, company_id: i64) -> Result<Option<Company>, AppError> {
        Ok(self.shared.data().companies.get(&company_id).cloned())
    }

    async fn get_quota(&self, company_id: i64) -> Result<Option<QuotaDetail>, AppError> {
        Ok(self
            .shared
            .data()
            .quotas
            .get(&company_id)
            .map(|q| QuotaDetail {
                company_id,
                unlock_quota_total: q.total,
                unlock_quota_used: q.used,
                period_start: q.period_start,
                period_end: q.period_end,
            }))
    }
}

#[async_trait]
impl AuditSink for MemoryStorage {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let mut data = self.shared.data();
        let id = i64::try_from(data.audit.len()).unwrap_or(i64::MAX) + 1;
        data.audit.push((
            entry.company_id,
            AuditLogRecord {
                id,
                hr_user_id: entry.hr_user_id,
                action: entry.action.clone(),
                target_type: entry.target_type.clone(),
                target_id: entry.target_id.clone(),
                meta: entry.meta.clone(),
                created_at: Utc::now(),
            },
        ));
        Ok(())
    }

    async fn list(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogRecord>, AppError> {
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .shared
            .data()
            .audit
            .iter()
            .rev()
            .filter(|(company, _)| *company == company_id)
            .skip(offset)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
