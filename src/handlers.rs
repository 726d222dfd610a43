use crate::audit::AuditLogger;
use crate::auth::{AuthenticatedHr, JwtVerifier};
use crate::config::Config;
use crate::deadline::Deadline;
use crate::errors::AppError;
use crate::models::*;
use crate::read_service::CandidateReadService;
use crate::skill_cache::SkillCache;
use crate::skill_resolver::SkillResolver;
use crate::store::{AccountStore, AuditSink, CandidateStore};
use crate::unlock::UnlockEngine;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Account lookups for `/api/me`.
    pub accounts: Arc<dyn AccountStore>,
    /// Audit log reads. Writes go through `audit`.
    pub audit_sink: Arc<dyn AuditSink>,
    /// Skill cache, exposed for invalidation.
    pub skill_cache: Arc<dyn SkillCache>,
    pub read_service: CandidateReadService,
    pub unlock_engine: UnlockEngine,
    /// Background audit writer.
    pub audit: AuditLogger,
    /// Session token verifier.
    pub jwt: JwtVerifier,
}

impl AppState {
    /// Wires the core services on top of the given storage and cache.
    pub fn new(
        config: Config,
        candidates: Arc<dyn CandidateStore>,
        accounts: Arc<dyn AccountStore>,
        audit_sink: Arc<dyn AuditSink>,
        skill_cache: Arc<dyn SkillCache>,
        audit: AuditLogger,
    ) -> Self {
        let mut resolver = SkillResolver::new(
            Arc::clone(&candidates),
            Arc::clone(&skill_cache),
            config.skills_cache_ttl(),
        );
        if config.skills_single_flight {
            resolver = resolver.with_single_flight();
        }

        Self {
            jwt: JwtVerifier::new(&config.jwt_secret),
            read_service: CandidateReadService::new(Arc::clone(&candidates), resolver),
            unlock_engine: UnlockEngine::new(candidates),
            config,
            accounts,
            audit_sink,
            skill_cache,
            audit,
        }
    }

    /// Deadline for the core work of one request.
    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.request_timeout())
    }

    fn audit_hr(
        &self,
        claims: &HrClaims,
        action: &str,
        target_type: &str,
        target_id: String,
        meta: serde_json::Value,
    ) {
        self.audit.log(AuditEntry {
            company_id: claims.company_id,
            hr_user_id: claims.hr_user_id,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id,
            meta,
        });
    }
}

// ============ Query parsing ============

/// Normalised `page` / `page_size` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    /// Unparseable or out-of-range values fall back to the defaults.
    pub fn parse(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| (1..=Self::MAX_PAGE_SIZE).contains(p))
            .unwrap_or(Self::DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// Raw query string values; every field is parsed leniently.
#[derive(Debug, Default, Deserialize)]
pub struct CandidateListParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub q: Option<String>,
    pub skill: Option<String>,
    pub english: Option<String>,
    pub bc_experience: Option<String>,
    pub availability_days_max: Option<String>,
    pub salary_min: Option<String>,
    pub salary_max: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value.map(str::trim) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

fn parse_i32(value: Option<&str>) -> Option<i32> {
    value.and_then(|v| v.trim().parse().ok())
}

impl CandidateListParams {
    pub fn into_filter(self, company_id: i64) -> (CandidateListFilter, Pagination) {
        let pagination = Pagination::parse(self.page.as_deref(), self.page_size.as_deref());
        let filter = CandidateListFilter {
            company_id,
            bc_experience: parse_bool(self.bc_experience.as_deref()),
            availability_max: parse_i32(self.availability_days_max.as_deref()),
            salary_min: parse_i32(self.salary_min.as_deref()),
            salary_max: parse_i32(self.salary_max.as_deref()),
            q: non_empty(self.q),
            skill: non_empty(self.skill),
            english_level: non_empty(self.english),
            limit: pagination.limit(),
            offset: pagination.offset(),
        };
        (filter, pagination)
    }
}

// ============ Handlers ============

/// Liveness check.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "System",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: chrono::Utc::now(),
    })
}

/// GET /api/candidates
///
/// One page of active candidates with skills and the per-company unlocked flag.
#[utoipa::path(
    get,
    path = "/api/candidates",
    tag = "Candidates",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size 1-100, default 20"),
        ("q" = Option<String>, Query, description = "Substring over name, role and summary"),
        ("skill" = Option<String>, Query, description = "Exact skill name, case-insensitive"),
        ("english" = Option<String>, Query, description = "English level"),
        ("bc_experience" = Option<bool>, Query, description = "Blockchain experience"),
        ("availability_days_max" = Option<i32>, Query, description = "Maximum days until available"),
        ("salary_min" = Option<i32>, Query, description = "Lower bound of the salary band (CNY)"),
        ("salary_max" = Option<i32>, Query, description = "Upper bound of the salary band (CNY)"),
    ),
    responses(
        (status = 200, description = "Candidate page", body = CandidateListResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorBody),
        (status = 403, description = "Account not active", body = ErrorBody),
    ),
    security(("hr_auth" = []))
)]
pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    AuthenticatedHr(claims): AuthenticatedHr,
    Query(params): Query<CandidateListParams>,
) -> Result<Json<CandidateListResponse>, AppError> {
    let (filter, pagination) = params.into_filter(claims.company_id);

    let items = state
        .read_service
        .list_candidates(&filter, state.deadline())
        .await?;

    state.audit_hr(
        &claims,
        "candidate.list",
        "company",
        claims.company_id.to_string(),
        json!({"page": pagination.page, "page_size": pagination.page_size}),
    );

    Ok(Json(CandidateListResponse { items }))
}

/// GET /api/candidates/{slug}
///
/// Candidate detail. The contact is included only once the company has unlocked it.
#[utoipa::path(
    get,
    path = "/api/candidates/{slug}",
    tag = "Candidates",
    params(("slug" = String, Path, description = "Candidate public slug")),
    responses(
        (status = 200, description = "Candidate detail", body = CandidateDetail),
        (status = 404, description = "Unknown or inactive candidate", body = ErrorBody),
    ),
    security(("hr_auth" = []))
)]
pub async fn get_candidate(
    State(state): State<Arc<AppState>>,
    AuthenticatedHr(claims): AuthenticatedHr,
    Path(slug): Path<String>,
) -> Result<Json<CandidateDetail>, AppError> {
    let detail = state
        .read_service
        .get_candidate_detail(claims.company_id, &slug, state.deadline())
        .await?;

    state.audit_hr(&claims, "candidate.view", "candidate", slug, json!({}));

    Ok(Json(detail))
}

/// POST /api/candidates/{slug}/unlock
///
/// Reveals the contact, charging one quota unit the first time. Repeating the
/// call for an unlocked candidate returns the same contact at no cost.
#[utoipa::path(
    post,
    path = "/api/candidates/{slug}/unlock",
    tag = "Candidates",
    params(("slug" = String, Path, description = "Candidate public slug")),
    responses(
        (status = 200, description = "Candidate contact", body = CandidateContact),
        (status = 402, description = "Unlock quota exhausted", body = ErrorBody),
        (status = 404, description = "Unknown or inactive candidate", body = ErrorBody),
        (status = 409, description = "Company has no quota configured", body = ErrorBody),
    ),
    security(("hr_auth" = []))
)]
pub async fn unlock_candidate(
    State(state): State<Arc<AppState>>,
    AuthenticatedHr(claims): AuthenticatedHr,
    Path(slug): Path<String>,
) -> Result<Json<CandidateContact>, AppError> {
    let receipt = state
        .unlock_engine
        .unlock_contact(
            claims.company_id,
            claims.hr_user_id,
            &slug,
            state.deadline(),
        )
        .await?;

    state.audit_hr(
        &claims,
        "candidate.unlock",
        "candidate",
        slug,
        json!({"charged": receipt.outcome == UnlockOutcome::Charged}),
    );

    Ok(Json(receipt.contact))
}

/// GET /api/me
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "Account",
    responses(
        (status = 200, description = "HR user, company and quota summary", body = AccountResponse),
        (status = 404, description = "User or company no longer exists", body = ErrorBody),
    ),
    security(("hr_auth" = []))
)]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthenticatedHr(claims): AuthenticatedHr,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .deadline()
        .run("load account", async {
            let user = state
                .accounts
                .get_hr_user(claims.hr_user_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("hr user {}", claims.hr_user_id)))?;
            let company = state
                .accounts
                .get_company(claims.company_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("company {}", claims.company_id)))?;
            let quota = state.accounts.get_quota(claims.company_id).await?;

            Ok(AccountResponse {
                user,
                company,
                quota: QuotaSummary::from_detail(quota),
            })
        })
        .await?;

    Ok(Json(account))
}

/// GET /api/audit-logs
///
/// Newest first. `total` is the number of items on this page.
#[utoipa::path(
    get,
    path = "/api/audit-logs",
    tag = "Account",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size 1-100, default 20"),
    ),
    responses((status = 200, description = "Audit log page", body = AuditLogPage)),
    security(("hr_auth" = []))
)]
pub async fn get_audit_logs(
    State(state): State<Arc<AppState>>,
    AuthenticatedHr(claims): AuthenticatedHr,
    Query(params): Query<PageParams>,
) -> Result<Json<AuditLogPage>, AppError> {
    let pagination = Pagination::parse(params.page.as_deref(), params.page_size.as_deref());

    let items = state
        .deadline()
        .run(
            "list audit logs",
            state
                .audit_sink
                .list(claims.company_id, pagination.limit(), pagination.offset()),
        )
        .await?;

    Ok(Json(AuditLogPage {
        total: items.len(),
        items,
        page: pagination.page,
        page_size: pagination.page_size,
    }))
}

/// DELETE /internal/cache/skills/{candidate_id}
///
/// Drops a candidate's cached skills after an external skill update.
#[utoipa::path(
    delete,
    path = "/internal/cache/skills/{candidate_id}",
    tag = "System",
    params(("candidate_id" = i64, Path, description = "Internal candidate id")),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 400, description = "Candidate id is not positive", body = ErrorBody),
        (status = 401, description = "Missing or wrong admin key", body = ErrorBody),
        (status = 404, description = "Endpoint disabled", body = ErrorBody),
    ),
    security(("admin_key" = []))
)]
pub async fn invalidate_skills(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(candidate_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let Some(ref expected_key) = state.config.admin_api_key else {
        return Err(AppError::NotFound("admin endpoints disabled".to_string()));
    };

    let key = headers
        .get("X-Admin-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("unauthorized".to_string()))?;

    if !constant_time_compare(key, expected_key) {
        tracing::warn!("Invalid admin key received");
        return Err(AppError::Unauthorized("unauthorized".to_string()));
    }

    if candidate_id <= 0 {
        return Err(AppError::BadRequest(format!(
            "candidate_id must be positive, got {}",
            candidate_id
        )));
    }

    state.skill_cache.invalidate(candidate_id).await?;
    tracing::info!(candidate_id, "Skill cache entry invalidated");

    Ok(StatusCode::NO_CONTENT)
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
