//! # Sewer Query
//!
//! Natural-language querying over sewer-inspection records.
//!
//! Inspection records are stored as numbered JSON-lines shards. At startup
//! the shards are loaded into one in-memory table (fetching missing shards
//! from an unauthenticated remote store when configured), a reproducible
//! random subset is drawn, and an LLM-backed agent is bound to that subset.
//! The agent is served over a single HTTP endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐
//! │ Shards       │──▶│  Ingest  │──▶│  Sample  │──▶│ TableAgent │
//! │ local/remote │   │  (table) │   │ (seeded) │   │  + LLM     │
//! └──────────────┘   └──────────┘   └──────────┘   └─────┬──────┘
//!                                                        │
//!                                   ┌────────────────────┤
//!                                   ▼                    ▼
//!                              ┌──────────┐        ┌──────────┐
//!                              │   CLI    │        │   HTTP   │
//!                              │ (sewerq) │        │  /query  │
//!                              └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sewerq load                               # ingest and summarize
//! sewerq sample --n 5                       # show a seeded sample
//! sewerq ask "How many inspections found roots?"
//! sewerq serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records and the in-memory table |
//! | [`fetch`] | Remote shard download |
//! | [`ingest`] | JSON-lines shard loading |
//! | [`sample`] | Deterministic sampling |
//! | [`query`] | Table operations the agent can run |
//! | [`llm`] | Language model backends |
//! | [`agent`] | The table query agent |
//! | [`context`] | Startup and shared state |
//! | [`server`] | HTTP query service |

pub mod agent;
pub mod config;
pub mod context;
pub mod fetch;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod progress;
pub mod query;
pub mod sample;
pub mod server;
pub mod traits;
