//! Candidate list and detail reads, with skills filled in by the resolver.

use crate::deadline::Deadline;
use crate::errors::AppError;
use crate::models::{CandidateCard, CandidateDetail, CandidateListFilter, CandidateRow};
use crate::skill_resolver::SkillResolver;
use crate::store::CandidateStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct CandidateReadService {
    store: Arc<dyn CandidateStore>,
    resolver: SkillResolver,
}

impl CandidateReadService {
    pub fn new(store: Arc<dyn CandidateStore>, resolver: SkillResolver) -> Self {
        Self { store, resolver }
    }

    /// One page of active candidates, most recently updated first.
    pub async fn list_candidates(
        &self,
        filter: &CandidateListFilter,
        deadline: Deadline,
    ) -> Result<Vec<CandidateCard>, AppError> {
        deadline
            .run("list candidates", async {
                let rows = self.store.list_candidates_page(filter).await?;
                self.to_cards(rows).await
            })
            .await
    }

    /// A single candidate. The contact is attached only when the company has
    /// already unlocked it.
    pub async fn get_candidate_detail(
        &self,
        company_id: i64,
        slug: &str,
        deadline: Deadline,
    ) -> Result<CandidateDetail, AppError> {
        deadline
            .run("get candidate", async {
                let row = self
                    .store
                    .get_candidate_with_unlock_flag(company_id, slug)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("candidate {}", slug)))?;

                let contact = if row.unlocked_contact {
                    self.store.get_contact(row.id).await?
                } else {
                    None
                };

                let card = self
                    .to_cards(vec![row])
                    .await?
                    .pop()
                    .ok_or_else(|| AppError::InternalError("candidate card missing".into()))?;

                Ok(CandidateDetail { card, contact })
            })
            .await
    }

    async fn to_cards(&self, rows: Vec<CandidateRow>) -> Result<Vec<CandidateCard>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut skills = self.resolver.resolve_skills(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let names = skills.remove(&row.id).unwrap_or_default();
                CandidateCard::from_row(row, names)
            })
            .collect())
    }
}
