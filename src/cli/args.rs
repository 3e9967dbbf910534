// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudimage-builder")]
#[command(about = "Build cloud-init enabled cloud images from vendor nuage images")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "CLOUDIMAGE_BUILDER_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build cloud images
    Build {
        /// Image entry to build; all entries matching --pattern when omitted
        entry: Option<String>,

        /// Case-insensitive glob over image entry names
        #[arg(short, long, default_value = "*", conflicts_with = "entry")]
        pattern: String,

        /// Print the published image records as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured image entries
    List {
        #[arg(short, long)]
        json: bool,
    },

    /// Check a published image against its .sha256 sidecar
    Validate {
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Check system prerequisites
    CheckPrereqs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_defaults_to_all_entries() {
        let cli = Cli::try_parse_from(["cloudimage-builder", "build"]).unwrap();
        match cli.command {
            Commands::Build {
                entry,
                pattern,
                json,
            } => {
                assert!(entry.is_none());
                assert_eq!(pattern, "*");
                assert!(!json);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_entry_and_pattern_conflict() {
        assert!(Cli::try_parse_from([
            "cloudimage-builder",
            "build",
            "freebsd-14",
            "--pattern",
            "free*"
        ])
        .is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["cloudimage-builder", "list", "-v", "--config", "/tmp/c.yaml"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
    }
}
