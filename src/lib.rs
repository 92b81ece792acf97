//! Mortgage Prescreen API Library
//!
//! This library provides the core functionality for the mortgage prescreen
//! service: bulk identity screening against a bureau matching vendor,
//! credit-tier scoring, and single-bureau backfill of missing results.
//!
//! # Modules
//!
//! - `circuit_breaker`: Circuit breaker for the matching vendor.
//! - `config`: Configuration management.
//! - `crypto`: PII encryption at rest.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `fill`: Bureau fill orchestrator.
//! - `handlers`: HTTP request handlers.
//! - `matching_client`: Bureau matching vendor client.
//! - `mem_store`: In-memory store implementations for tests.
//! - `models`: Core data models.
//! - `pg_store`: Postgres store implementations.
//! - `programs`: Fill program registry.
//! - `scoring`: Middle-score and tier computation.
//! - `store`: Repository interfaces.
//! - `submission`: Batch submission orchestrator.

pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod fill;
pub mod handlers;
pub mod matching_client;
pub mod mem_store;
pub mod models;
pub mod pg_store;
pub mod programs;
pub mod scoring;
pub mod store;
pub mod submission;
