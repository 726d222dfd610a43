use crate::errors::{AppError, ResultExt};
use crate::models::{
    AuditEntry, AuditLogRecord, CandidateContact, CandidateListFilter, CandidateRow, Company,
    HrUser, QuotaDetail, QuotaRow, SkillRow, UNLOCK_TYPE_CONTACT,
};
use crate::store::{escape_like, AccountStore, AuditSink, CandidateStore, UnlockTx};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

/// PostgreSQL-backed storage for candidates, quotas, accounts and audit logs.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CANDIDATE_COLUMNS: &str = r#"
    c.id, c.public_slug, c.display_name,
    c.desired_role, c.english_level,
    c.expected_salary_min_cny, c.expected_salary_max_cny,
    c.availability_days, c.timezone,
    c.bc_experience, c.summary,
    (u.id IS NOT NULL) AS unlocked_contact
"#;

#[async_trait]
impl CandidateStore for PgStorage {
    async fn find_candidate_id_by_slug(&self, slug: &str) -> Result<Option<i64>, AppError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM candidates WHERE public_slug = $1 AND status = 'active' LIMIT 1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("resolving candidate slug")
    }

    async fn begin_unlock(&self) -> Result<Box<dyn UnlockTx>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("beginning unlock transaction")?;
        Ok(Box::new(PgUnlockTx { tx: Some(tx) }))
    }

    async fn get_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>, AppError> {
        sqlx::query_as::<_, CandidateContact>(
            r#"
            SELECT
              NULLIF(tg_username, '')::text AS tg_username,
              NULLIF(email::text, '')       AS email,
              NULLIF(phone, '')::text       AS phone
            FROM candidate_contacts
            WHERE candidate_id = $1
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching candidate contact")
    }

    async fn list_skills(&self, candidate_ids: &[i64]) -> Result<Vec<SkillRow>, AppError> {
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, SkillRow>(
            r#"
            SELECT cs.candidate_id, s.name
            FROM candidate_skills cs
            JOIN skills s ON s.id = cs.skill_id
            WHERE cs.candidate_id = ANY($1)
            ORDER BY cs.candidate_id, s.name
            "#,
        )
        .bind(candidate_ids)
        .fetch_all(&self.pool)
        .await
        .context("listing candidate skills")
    }

    async fn list_candidates_page(
        &self,
        filter: &CandidateListFilter,
    ) -> Result<Vec<CandidateRow>, AppError> {
        let q_pattern = filter.q.as_deref().map(|q| format!("%{}%", escape_like(q)));

        let sql = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS}
            FROM candidates c
            LEFT JOIN unlocks u
              ON u.company_id = $1 AND u.candidate_id = c.id AND u.unlock_type = $2
            WHERE c.status = 'active'
              AND ($3::text IS NULL OR c.english_level = $3)
              AND ($4::boolean IS NULL OR c.bc_experience = $4)
              AND ($5::int IS NULL OR c.availability_days <= $5)
              AND ($6::int IS NULL OR c.expected_salary_max_cny IS NULL OR c.expected_salary_max_cny >= $6)
              AND ($7::int IS NULL OR c.expected_salary_min_cny IS NULL OR c.expected_salary_min_cny <= $7)
              AND ($8::text IS NULL OR EXISTS (
                    SELECT 1 FROM candidate_skills cs
                    JOIN skills s ON s.id = cs.skill_id
                    WHERE cs.candidate_id = c.id AND lower(s.name) = lower($8)))
              AND ($9::text IS NULL
                   OR c.display_name ILIKE $9
                   OR c.desired_role ILIKE $9
                   OR c.summary ILIKE $9)
            ORDER BY c.updated_at DESC, c.id DESC
            LIMIT $10 OFFSET $11
            "#
        );

        sqlx::query_as::<_, CandidateRow>(&sql)
            .bind(filter.company_id)
            .bind(UNLOCK_TYPE_CONTACT)
            .bind(filter.english_level.as_deref())
            .bind(filter.bc_experience)
            .bind(filter.availability_max)
            .bind(filter.salary_min)
            .bind(filter.salary_max)
            .bind(filter.skill.as_deref())
            .bind(q_pattern)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .context("listing candidates page")
    }

    async fn get_candidate_with_unlock_flag(
        &self,
        company_id: i64,
        slug: &str,
    ) -> Result<Option<CandidateRow>, AppError> {
        let sql = format!(
            r#"
            SELECT {CANDIDATE_COLUMNS}
            FROM candidates c
            LEFT JOIN unlocks u
              ON u.company_id = $1 AND u.candidate_id = c.id AND u.unlock_type = $2
            WHERE c.public_slug = $3 AND c.status = 'active'
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, CandidateRow>(&sql)
            .bind(company_id)
            .bind(UNLOCK_TYPE_CONTACT)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .context("fetching candidate detail")
    }
}

/// Unlock transaction on a pooled connection. Dropping it un-committed makes
/// sqlx roll it back when the connection returns to the pool.
pub struct PgUnlockTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnlockTx {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, AppError> {
        self.tx
            .as_mut()
            .ok_or_else(|| AppError::InternalError("unlock transaction already finished".into()))
    }
}

#[async_trait]
impl UnlockTx for PgUnlockTx {
    async fn lock_quota_row(&mut self, company_id: i64) -> Result<Option<QuotaRow>, AppError> {
        let tx = self.open()?;
        sqlx::query_as::<_, QuotaRow>(
            r#"
            SELECT company_id, unlock_quota_total, unlock_quota_used
            FROM company_quotas
            WHERE company_id = $1
            FOR UPDATE
            "#,
        )
        .bind(company_id)
        .fetch_optional(&mut **tx)
        .await
        .context("locking company quota row")
    }

    async fn insert_unlock_if_absent(
        &mut self,
        company_id: i64,
        hr_user_id: i64,
        candidate_id: i64,
    ) -> Result<bool, AppError> {
        let tx = self.open()?;
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO unlocks (company_id, hr_user_id, candidate_id, unlock_type, cost)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (company_id, candidate_id, unlock_type) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(company_id)
        .bind(hr_user_id)
        .bind(candidate_id)
        .bind(UNLOCK_TYPE_CONTACT)
        .fetch_optional(&mut **tx)
        .await
        .context("inserting unlock")?;

        Ok(inserted.is_some())
    }

    async fn increment_quota_used(
        &mut self,
        company_id: i64,
        delta: i32,
    ) -> Result<(), AppError> {
        let tx = self.open()?;
        let result = sqlx::query(
            r#"
            UPDATE company_quotas
            SET unlock_quota_used = unlock_quota_used + $2, updated_at = now()
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .bind(delta)
        .execute(&mut **tx)
        .await
        .context("incrementing quota usage")?;

        if result.rows_affected() != 1 {
            return Err(AppError::InternalError(format!(
                "quota row for company {} disappeared during unlock",
                company_id
            )));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::InternalError("unlock transaction already finished".into()))?;
        tx.commit().await.context("committing unlock")
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.context("rolling back unlock"),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AccountStore for PgStorage {
    async fn get_hr_user(&self, hr_user_id: i64) -> Result<Option<HrUser>, AppError> {
        sqlx::query_as::<_, HrUser>(
            r#"
            SELECT id, company_id, status, role, display_name,
                   NULLIF(tg_username, '') AS tg_username
            FROM hr_users
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(hr_user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching hr user")
    }

    async fn get_company(&self, company_id: i64) -> Result<Option<Company>, AppError> {
        sqlx::query_as::<_, Company>("SELECT id, name, status FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching company")
    }

    async fn get_quota(&self, company_id: i64) -> Result<Option<QuotaDetail>, AppError> {
        sqlx::query_as::<_, QuotaDetail>(
            r#"
            SELECT company_id, unlock_quota_total, unlock_quota_used, period_start, period_end
            FROM company_quotas
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching company quota")
    }
}

#[async_trait]
impl AuditSink for PgStorage {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (company_id, hr_user_id, action, target_type, target_id, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            "#,
        )
        .bind(entry.company_id)
        .bind(entry.hr_user_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.meta)
        .execute(&self.pool)
        .await
        .context("inserting audit log")?;
        Ok(())
    }

    async fn list(
        &self,
        company_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogRecord>, AppError> {
        sqlx::query_as::<_, AuditLogRecord>(
            r#"
            SELECT id, hr_user_id, action, target_type, target_id, meta, created_at
            FROM audit_logs
            WHERE company_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(company_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("listing audit logs")
    }
}
