//! # VendorIQ
//!
//! A vendor-invoice knowledge retrieval and answer synthesis engine.
//!
//! VendorIQ ingests vendor invoice records (from local JSON files or a remote
//! document store), chunks and embeds them into a SQLite-backed vector store,
//! and answers natural-language questions about vendor spend with ranked
//! source attribution. A full-scan analytics aggregator produces spend
//! rankings, trend series, and a narrative summary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Vendor JSON  │──▶│  Chunk+Embed │──▶│  SQLite    │
//! │ local/remote │   │  pipeline    │   │ vectors    │
//! └──────────────┘   └──────────────┘   └────┬──────┘
//!                                            │
//!                       ┌────────────────────┤
//!                       ▼                    ▼
//!                  ┌──────────┐        ┌──────────┐
//!                  │   CLI    │        │   HTTP   │
//!                  │  (viq)   │        │  server  │
//!                  └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! viq init                        # create database
//! viq load                        # ingest vendor JSON files
//! viq ask "top vendors by spend"
//! viq analytics --period quarter
//! viq serve                       # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and operation outcomes |
//! | [`money`] | Currency-string normalization |
//! | [`loader`] | Local vendor JSON loading and chunk building |
//! | [`remote`] | Remote vendor record loader |
//! | [`embedding`] | Embedding calls and vector math |
//! | [`store`] | SQLite vector store |
//! | [`router`] | Query intent classification and vendor resolution |
//! | [`retrieval`] | Ranked source assembly and context building |
//! | [`llm`] | Generation provider with safety-block handling |
//! | [`answer`] | Prompt building and deterministic renderers |
//! | [`analytics`] | Spend analytics aggregation |
//! | [`engine`] | Orchestration context object |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analytics;
pub mod answer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod money;
pub mod remote;
pub mod retrieval;
pub mod router;
pub mod server;
pub mod store;
