//! Fiber Service Address Map API Library
//!
//! This library provides the core functionality for the fiber service
//! address map backend, including the dynamic inventory query layer over a
//! configurable schema, the PON proxy optical fan-out, reading extraction
//! and health classification, and HTTP handlers.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `classifier`: CPE matching and health classification.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `filters`: Query parameter parsing and normalization.
//! - `handlers`: HTTP request handlers.
//! - `inventory`: Inventory query execution and row mapping.
//! - `models`: Core data models.
//! - `optics_client`: PON proxy client.
//! - `optics_extract`: Nested reading extraction.
//! - `optics_fanout`: Concurrent per-OLT fan-out.
//! - `query_builder`: Parameterized SQL assembly.
//! - `recurring`: Recurring fan-out runner.
//! - `snapshot`: Latest-snapshot store.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod filters;
pub mod handlers;
pub mod inventory;
pub mod models;
pub mod optics_client;
pub mod optics_extract;
pub mod optics_fanout;
pub mod query_builder;
pub mod recurring;
pub mod snapshot;
