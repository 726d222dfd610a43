use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Unlock type recorded for contact reveals. The only type currently sold.
pub const UNLOCK_TYPE_CONTACT: &str = "contact";

// ============ Database Models ============

/// A candidate row as returned by the list and detail queries.
///
/// `unlocked_contact` is computed per requesting company.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct CandidateRow {
    /// Internal numeric identifier.
    pub id: i64,
    /// Public, immutable slug used in URLs.
    pub public_slug: String,
    pub display_name: String,
    pub desired_role: Option<String>,
    pub english_level: Option<String>,
    pub expected_salary_min_cny: Option<i32>,
    pub expected_salary_max_cny: Option<i32>,
    pub availability_days: Option<i32>,
    pub timezone: Option<String>,
    pub bc_experience: bool,
    pub summary: Option<String>,
    /// Whether the requesting company already unlocked this candidate's contact.
    pub unlocked_contact: bool,
}

/// One `(candidate_id, skill name)` pair from the batch skill query.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct SkillRow {
    pub candidate_id: i64,
    pub name: String,
}

/// Snapshot of a company's quota ledger row.
#[derive(Debug, Clone, Copy, FromRow, PartialEq, Eq)]
pub struct QuotaRow {
    pub company_id: i64,
    pub unlock_quota_total: i32,
    pub unlock_quota_used: i32,
}

impl QuotaRow {
    /// Whether another unlock may be charged against this row.
    pub fn has_remaining(&self) -> bool {
        self.unlock_quota_used < self.unlock_quota_total
    }

    /// Remaining unlocks, never negative.
    pub fn remaining(&self) -> i32 {
        (self.unlock_quota_total - self.unlock_quota_used).max(0)
    }
}

/// Quota row with its informational billing period.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct QuotaDetail {
    pub company_id: i64,
    pub unlock_quota_total: i32,
    pub unlock_quota_used: i32,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

/// HR user profile.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct HrUser {
    pub id: i64,
    pub company_id: i64,
    pub status: String,
    pub role: String,
    pub display_name: String,
    pub tg_username: Option<String>,
}

/// Company owning HR users and a quota ledger row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub status: String,
}

// ============ API Models ============

/// Contact details revealed by an unlock. Absent fields are omitted.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CandidateContact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tg_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Candidate card shown in lists.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CandidateCard {
    pub slug: String,
    pub display_name: String,
    pub desired_role: Option<String>,
    pub english_level: Option<String>,
    pub expected_salary_min_cny: Option<i32>,
    pub expected_salary_max_cny: Option<i32>,
    pub availability_days: Option<i32>,
    pub timezone: Option<String>,
    pub bc_experience: bool,
    pub summary: Option<String>,
    pub unlocked_contact: bool,
    pub skills: Vec<String>,
}

impl CandidateCard {
    /// Builds a card from a store row; skills are filled in by the resolver.
    pub fn from_row(row: CandidateRow, skills: Vec<String>) -> Self {
        Self {
            slug: row.public_slug,
            display_name: row.display_name,
            desired_role: row.desired_role,
            english_level: row.english_level,
            expected_salary_min_cny: row.expected_salary_min_cny,
            expected_salary_max_cny: row.expected_salary_max_cny,
            availability_days: row.availability_days,
            timezone: row.timezone,
            bc_experience: row.bc_experience,
            summary: row.summary,
            unlocked_contact: row.unlocked_contact,
            skills,
        }
    }
}

/// Candidate detail: a card plus the contact when already unlocked.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CandidateDetail {
    #[serde(flatten)]
    pub card: CandidateCard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<CandidateContact>,
}

/// List response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CandidateListResponse {
    pub items: Vec<CandidateCard>,
}

/// Filters accepted by the candidate list query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateListFilter {
    /// Requesting company, used for the unlocked flag.
    pub company_id: i64,
    /// Substring match over name, role and summary.
    pub q: Option<String>,
    /// Exact skill name, case-insensitive.
    pub skill: Option<String>,
    pub english_level: Option<String>,
    pub bc_experience: Option<bool>,
    pub availability_max: Option<i32>,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub limit: i64,
    pub offset: i64,
}

/// Whether an unlock call performed the charge or found an existing unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOutcome {
    Charged,
    AlreadyUnlocked,
}

/// Result of a successful unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockReceipt {
    pub candidate_id: i64,
    pub outcome: UnlockOutcome,
    pub contact: CandidateContact,
}

/// Claims carried by the `hr_auth` session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HrClaims {
    pub hr_user_id: i64,
    pub company_id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub role: String,
}

/// Quota section of the account summary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct QuotaSummary {
    pub configured: bool,
    pub unlock_quota_total: i32,
    pub unlock_quota_used: i32,
    pub unlock_quota_remaining: i32,
    /// `YYYY-MM-DD`, omitted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<NaiveDate>,
    /// `YYYY-MM-DD`, omitted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
}

impl QuotaSummary {
    pub fn from_detail(detail: Option<QuotaDetail>) -> Self {
        match detail {
            Some(q) => {
                let row = QuotaRow {
                    company_id: q.company_id,
                    unlock_quota_total: q.unlock_quota_total,
                    unlock_quota_used: q.unlock_quota_used,
                };
                Self {
                    configured: true,
                    unlock_quota_total: q.unlock_quota_total,
                    unlock_quota_used: q.unlock_quota_used,
                    unlock_quota_remaining: row.remaining(),
                    period_start: q.period_start,
                    period_end: q.period_end,
                }
            }
            None => Self {
                configured: false,
                unlock_quota_total: 0,
                unlock_quota_used: 0,
                unlock_quota_remaining: 0,
                period_start: None,
                period_end: None,
            },
        }
    }
}

/// GET /api/me response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub user: HrUser,
    pub company: Company,
    pub quota: QuotaSummary,
}

/// An audit event waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub company_id: i64,
    pub hr_user_id: i64,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub meta: serde_json::Value,
}

/// A persisted audit event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct AuditLogRecord {
    pub id: i64,
    pub hr_user_id: i64,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    #[schema(value_type = Object)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// GET /healthz response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: DateTime<Utc>,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable error code, e.g. `quota_exceeded`.
    pub error: String,
}

/// GET /api/audit-logs response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogPage {
    pub items: Vec<AuditLogRecord>,
    pub page: i64,
    pub page_size: i64,
    pub total: usize,
}
