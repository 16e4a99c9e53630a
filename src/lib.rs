//! # MCP Iterative Analysis Server
//!
//! A Model Context Protocol (MCP) server that answers investment questions by
//! iterative refinement: draft an answer, critique it, retrieve evidence for
//! its gaps, and refine it until it is good enough or the iteration cap is hit.
//! Every language-model role is delegated to a Langbase Pipe.
//!
//! ## The loop
//!
//! - **Evaluate**: score the draft on a 0-10 completeness scale and list gaps
//! - **Plan**: turn gaps into new, deduplicated retrieval queries
//! - **Retrieve / Validate**: query the primary index, validate each answer,
//!   and fall back to a trusted-source search when validation fails
//! - **Aggregate**: fold validated evidence into the next revision
//!
//! Sessions run on their own tasks, persist every committed iteration, and
//! can be cancelled between stages.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → Langbase Pipes (HTTP)
//!                    ↓
//!              SQLite (State)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_iterative_analysis::{AppState, Config, McpServer};
//! use mcp_iterative_analysis::collaborators::{Collaborators, LangbaseCollaborators};
//! use mcp_iterative_analysis::langbase::LangbaseClient;
//! use mcp_iterative_analysis::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let backend = Arc::new(LangbaseCollaborators::new(client, config.pipes.clone()));
//!     let state = AppState::new(config, store, Collaborators::uniform(backend));
//!     McpServer::new(Arc::new(state)).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Iterative refinement loop, session scheduling and progress tracking.
pub mod analysis;
/// Command-line interface.
pub mod cli;
/// Collaborator roles (generate, evaluate, retrieve, validate, fallback search).
pub mod collaborators;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
