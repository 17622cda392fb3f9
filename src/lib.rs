//! CDP Offer API Library
//!
//! Lead ingestion for a customer data platform: incoming leads are matched to
//! existing customers by exact identifier, the lead's offer is weighed against
//! the customer's current Active offer, and every offer status change is
//! recorded in an append-only history.
//!
//! # Modules
//!
//! - `api`: Router, middleware and OpenAPI document.
//! - `config`: Configuration management.
//! - `db`: Database connection pool and migrations.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `identifiers`: Identifier normalization (mobile, PAN, Aadhaar, UCID, LAN).
//! - `matcher`: Customer matching and merging.
//! - `models`: Core data models.
//! - `precedence`: Offer precedence and status transitions.
//! - `services`: Ingestion, customer, offer and job services.
//! - `store`: Storage trait with PostgreSQL and in-memory backends.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod identifiers;
pub mod matcher;
pub mod models;
pub mod precedence;
pub mod services;
pub mod store;
