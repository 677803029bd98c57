// src/cli/mod.rs
// Command-line interface

mod serve;
mod tool;

pub use serve::run_mcp_server;
pub use tool::run_tool;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "devctx", about = "Conversation-scoped context retrieval engine", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server on stdio (default)
    Serve,
    /// Invoke a single tool from the command line
    Tool {
        /// Tool name: ping_server, initialize_conversation_context,
        /// retrieve_relevant_context
        name: String,
        /// JSON arguments for the tool
        args: Option<String>,
    },
}
