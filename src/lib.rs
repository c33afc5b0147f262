#![deny(missing_docs)]

//! Core library for the manual knowledge retrieval pipeline.
//!
//! Ingests technical service manuals as overlapping text chunks, embeds them
//! into a vector store, and answers natural-language queries with retrieved
//! context, a calibrated confidence signal, and citations.

/// Environment-driven configuration management.
pub mod config;
/// Embedding strategies and the mixing guard between them.
pub mod embedding;
/// External text-generation endpoint client.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Document processing pipeline: normalization, chunking, ingestion, answers.
pub mod processing;
/// Vector store abstraction and backends.
pub mod store;
