//! Command-line interface.
//!
//! With no subcommand the binary serves MCP over stdio. The other commands
//! run or inspect analyses directly against the configured database.

use clap::{Parser, Subcommand};

use crate::analysis::{AnalysisEngine, AnalysisExport, SessionSummary, StatusSnapshot};

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "mcp-iterative-analysis", version, about)]
pub struct Cli {
    /// Command to run; defaults to `serve`.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve MCP over stdio
    Serve,

    /// Run one analysis to completion and print the result
    Run {
        /// The investment question to analyze
        #[arg(long)]
        query: String,

        /// Optional subject filter, e.g. a company name or ticker
        #[arg(long)]
        scope: Option<String>,

        /// Use scripted collaborators instead of Langbase
        #[arg(long)]
        offline: bool,

        /// Print the full export as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the status of an analysis
    Status {
        /// Analysis session ID
        session_id: String,
    },

    /// Print the export of a finished analysis as JSON
    Export {
        /// Analysis session ID
        session_id: String,
    },

    /// List recent analyses
    List {
        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

impl Commands {
    /// Whether the command needs Langbase.
    pub fn is_offline(&self) -> bool {
        match self {
            Commands::Serve => false,
            Commands::Run { offline, .. } => *offline,
            Commands::Status { .. } | Commands::Export { .. } | Commands::List { .. } => true,
        }
    }
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a non-serve command.
pub async fn execute_command(command: Commands, engine: &AnalysisEngine) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is handled by the server entry point"),
        Commands::Run {
            query, scope, json, ..
        } => match engine.run_to_completion(&query, scope.as_deref()).await {
            Ok(export) if json => to_json(&export),
            Ok(export) => CliResult::success(format_export(&export)),
            Err(e) => CliResult::error(format!("Analysis failed: {}", e)),
        },
        Commands::Status { session_id } => match engine.tracker().get_status(&session_id).await {
            Ok(status) => CliResult::success(format_status(&status)),
            Err(e) => CliResult::error(e.to_string()),
        },
        Commands::Export { session_id } => {
            match engine.tracker().export_result(&session_id).await {
                Ok(export) => to_json(&export),
                Err(e) => CliResult::error(e.to_string()),
            }
        }
        Commands::List { limit } => match engine.tracker().list_sessions(limit).await {
            Ok(sessions) => CliResult::success(format_list(&sessions)),
            Err(e) => CliResult::error(e.to_string()),
        },
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> CliResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => CliResult::success(json),
        Err(e) => CliResult::error(format!("Failed to serialize output: {}", e)),
    }
}

const RULE: &str =
    "═══════════════════════════════════════════════════════════════════════════════";

fn format_export(export: &AnalysisExport) -> String {
    let mut output = String::new();

    output.push_str(&format!("\nAnalysis {}\n{}\n\n", export.session_id, RULE));
    output.push_str(&format!("Query:       {}\n", export.query));
    if let Some(scope) = &export.scope_filter {
        output.push_str(&format!("Scope:       {}\n", scope));
    }
    output.push_str(&format!(
        "Outcome:     {} ({})\n",
        export.status, export.termination_reason
    ));
    if let Some(message) = &export.error_message {
        output.push_str(&format!("Error:       {}\n", message));
    }

    let trajectory: Vec<String> = export
        .stats
        .score_trajectory
        .iter()
        .map(|s| format!("{:.1}", s))
        .collect();
    output.push_str(&format!(
        "Iterations:  {} (scores: {})\n",
        export.stats.iterations,
        if trajectory.is_empty() {
            "-".to_string()
        } else {
            trajectory.join(" → ")
        }
    ));
    output.push_str(&format!(
        "Evidence:    {} primary, {} fallback, {} low confidence from {} queries\n",
        export.stats.primary_evidence,
        export.stats.fallback_evidence,
        export.stats.low_confidence_evidence,
        export.stats.queries
    ));
    if let Some(recommendation) = &export.final_recommendation {
        output.push_str(&format!("\nRecommendation: {}\n", recommendation));
    }
    if let Some(confidence) = &export.confidence_level {
        output.push_str(&format!("Confidence:     {}\n", confidence));
    }
    if let Some(draft) = &export.final_draft {
        output.push_str(&format!("\n{}\n", draft.render()));
    }

    output
}

fn format_status(status: &StatusSnapshot) -> String {
    let mut output = format!("\nAnalysis {}\n{}\n\n", status.session_id, RULE);

    output.push_str(&format!("Status:      {}\n", status.status));
    if let Some(phase) = status.phase {
        output.push_str(&format!("Stage:       {}\n", phase.as_str()));
    }
    output.push_str(&format!("Iterations:  {}\n", status.iteration_index));
    output.push_str(&format!(
        "Score:       {}\n",
        status
            .latest_score
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "Progress:    {} queries, {} evidence items\n",
        status.queries_executed, status.evidence_collected
    ));
    if status.cancel_requested {
        output.push_str("Cancellation requested\n");
    }
    if let Some(reason) = status.termination_reason {
        output.push_str(&format!("Stopped:     {}\n", reason));
    }
    if let Some(message) = &status.error_message {
        output.push_str(&format!("Error:       {}\n", message));
    }

    output
}

fn format_list(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No analyses found.".to_string();
    }

    let mut output = format!("\nRecent Analyses\n{}\n\n", RULE);
    for session in sessions {
        let query: String = session.query.chars().take(48).collect();
        output.push_str(&format!(
            "{}  {:<10} {:>2} it.  {}\n",
            session.id,
            session.status.as_str(),
            session.iteration_count,
            query
        ));
    }
    output
}
