//! # SOTAforge
//!
//! An LLM-driven pipeline that turns a research topic into a
//! state-of-the-art (SOTA) report.
//!
//! A fixed orchestrator drives the model through six stages. In each stage
//! the model calls tools, the results are persisted in a document store,
//! and an LLM judge validates the outcome with a bounded number of retries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │ CLI/HTTP │──▶│ Orchestrator │──▶│    Tools    │
//! │ sota run │   │ stage runner │   │ search/parse│
//! └────┬─────┘   │ + validator  │   │ analyze/... │
//!      │         └──────┬───────┘   └──────┬──────┘
//!      │ progress       │ chat             │ documents
//!      ▼                ▼                  ▼
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │ SSE/     │   │ OpenAI-compat│   │   SQLite    │
//! │ stderr   │   │ + rate limit │   │ namespaced  │
//! └──────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=... SERPER_API_KEY=...
//! sota init
//! sota run "edge computing"
//! sota serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Namespaced SQLite document store |
//! | [`llm`] | Chat provider trait and OpenAI client |
//! | [`rate_limit`] | Cooldown and history-shrinking retries |
//! | [`tools`] | Tools exposed to the model |
//! | [`executor`] | Tool-call execution and chat rounds |
//! | [`validator`] | LLM-as-judge step validation |
//! | [`prompts`] | Orchestrator prompt text |
//! | [`pipeline`] | Stage runner and orchestrator |
//! | [`progress`] | Progress events and reporters |
//! | [`server`] | HTTP API with SSE progress |
//! | [`error`] | Pipeline error type |

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod server;
pub mod sqlite_store;
pub mod tools;
pub mod validator;
