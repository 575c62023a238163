//! CLI argument definitions using clap derive macros.
//!
//! The binary surface is deliberately thin: subcommand selection, file
//! paths and verbosity. Everything substantive lives in the config file
//! and the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Discover, download and package library books organized by skill.
#[derive(Parser, Debug)]
#[command(name = "skillshelf")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a JSON config file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the JSON cookie file (name → value object)
    #[arg(long, global = true)]
    pub cookies: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover books for each topic and write per-topic manifests
    Discover {
        /// JSON file listing topics: [{"name": …, "expected_count": …}]
        #[arg(long)]
        skills_file: PathBuf,
    },

    /// Download and package every book listed in the topic manifests
    Download {
        /// Ignore the on-disk existence check and re-download everything
        #[arg(long)]
        force: bool,
    },
}
