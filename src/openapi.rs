//! OpenAPI document, generated with utoipa from the handler annotations.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers;
use crate::models::{
    AccountResponse, AuditLogPage, AuditLogRecord, CandidateCard, CandidateContact,
    CandidateDetail, CandidateListResponse, Company, ErrorBody, HealthResponse, HrUser,
    QuotaSummary,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HR Talent API",
        version = "0.1.0",
        description = "Candidate browsing and quota-gated contact unlocks for HR teams"
    ),
    tags(
        (name = "Candidates", description = "Candidate lists, details and contact unlocks"),
        (name = "Account", description = "Current HR user, quota and audit trail"),
        (name = "System", description = "Health and maintenance endpoints")
    ),
    paths(
        handlers::health,
        handlers::list_candidates,
        handlers::get_candidate,
        handlers::unlock_candidate,
        handlers::get_me,
        handlers::get_audit_logs,
        handlers::invalidate_skills,
    ),
    components(schemas(
        AccountResponse,
        AuditLogPage,
        AuditLogRecord,
        CandidateCard,
        CandidateContact,
        CandidateDetail,
        CandidateListResponse,
        Company,
        ErrorBody,
        HealthResponse,
        HrUser,
        QuotaSummary,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "hr_auth",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(crate::auth::AUTH_COOKIE))),
            );
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Admin-Key"))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthz",
            "/api/me",
            "/api/candidates",
            "/api/candidates/{slug}",
            "/api/candidates/{slug}/unlock",
            "/api/audit-logs",
            "/internal/cache/skills/{candidate_id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
