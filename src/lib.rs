//! HR Talent API Library
//!
//! Candidate browsing for HR teams, with quota-gated contact unlocks and a
//! cache-aside skill read path.
//!
//! # Modules
//!
//! - `audit`: Background audit log writer.
//! - `auth`: Session token verification and the authenticated-user extractor.
//! - `cache_validator`: Checksummed skill cache payloads.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: PostgreSQL implementation of the storage traits.
//! - `deadline`: Per-operation deadlines.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `memory_store`: In-process implementation of the storage traits, for tests
//!   (`test-util` feature).
//! - `models`: Core data models.
//! - `openapi`: OpenAPI document.
//! - `read_service`: Candidate list and detail reads.
//! - `routes`: HTTP router.
//! - `skill_cache`: Skill cache trait and moka implementation.
//! - `skill_resolver`: Cache-aside skill resolution.
//! - `store`: Storage traits.
//! - `unlock`: Quota-gated contact unlocks.

pub mod audit;
pub mod auth;
pub mod cache_validator;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod deadline;
pub mod errors;
pub mod handlers;
#[cfg(any(test, feature = "test-util"))]
pub mod memory_store;
pub mod models;
pub mod openapi;
pub mod read_service;
pub mod routes;
pub mod skill_cache;
pub mod skill_resolver;
pub mod store;
pub mod unlock;
