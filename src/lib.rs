//! gavel: civic meeting agenda ingestion and AI summarization pipeline.
//!
//! Vendor adapters reconcile six civic-software portals into one
//! meeting/item/attachment model. A SQLite-backed queue drives a bounded
//! worker pool through download, extraction, and summarization, with rate
//! limiters pacing both the city portals and the LLM provider.

pub mod conductor;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod health;
mod migrations;
pub mod pdf_chunker;
pub mod processor;
pub mod provider_limit;
pub mod rate_limit;
pub mod summarize;
pub mod types;
pub mod vendors;
