use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = r#"covmerge collects coverage from integration tests that run builds in
isolated sandboxes.

Each sandboxed build runs its own coverage agent. Instead of letting every
agent write its own file, covmerge listens on a loopback port; the agents
connect to it in tcpclient mode and everything they report is merged into
a single execution-data file.

WORKFLOW:
    1. Start the listener:            covmerge serve -o build/it.exec
    2. Point each sandbox at it:      covmerge forward <project> --port <port>
    3. Run the sandboxed builds
    4. Stop the listener (Ctrl-C); the output is flushed and closed

EXAMPLES:
    covmerge serve -o build/jacoco/it.exec --port-file build/it.port
    covmerge forward build/sandbox/app --port 41234
    covmerge inspect build/jacoco/it.exec --merged"#;

#[derive(Parser)]
#[command(name = "covmerge")]
#[command(author, version)]
#[command(about = "Merge coverage from sandboxed builds into one execution-data file")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output (also respects NO_COLOR env var)
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Returns the effective output format, considering --json shorthand.
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }

    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Listen for coverage agents and merge what they send
    #[command(long_about = r#"Listen for coverage agents and merge what they send.

Binds an ephemeral loopback port, prints it, and appends every session-info
and execution-data block received from connected agents to the output file.
Runs until SIGINT/SIGTERM or until --duration elapses, then drains the
connected agents (bounded by the drain timeout) and closes the output.

The output is appended to, never truncated; use --clean to start over.

EXAMPLES:
    covmerge serve -o build/it.exec
    covmerge serve -o build/it.exec --forward-to sandbox/a --forward-to sandbox/b
    covmerge serve -o build/it.exec --includes 'com.acme.*' --excludes ''"#)]
    Serve(ServeArgs),

    /// Print the contents of an execution-data file
    #[command(long_about = r#"Print the contents of an execution-data file.

Lists the session infos and per-class records. With --merged, records
for the same class are combined (probes OR-ed) the way report tools do."#)]
    Inspect {
        /// Execution-data file to read
        file: PathBuf,

        /// Combine records of the same class
        #[arg(long)]
        merged: bool,
    },

    /// Point a sandbox project at a running listener
    #[command(long_about = r#"Point a sandbox project at a running listener.

Appends systemProp.jacoco-agent.* entries to <project>/gradle.properties so
the agent inside the sandbox connects to the listener in tcpclient mode.

EXAMPLES:
    covmerge forward build/sandbox/app --port 41234
    covmerge forward build/sandbox/app --port 41234 --dry-run --javaagent agent.jar"#)]
    Forward(ForwardArgs),

    /// Show environment configuration
    Env,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Merged execution-data file
    #[arg(short, long, env = "COVMERGE_OUTPUT")]
    pub output: PathBuf,

    /// Agent include patterns forwarded to sandboxes
    #[arg(long, requires = "excludes")]
    pub includes: Option<String>,

    /// Agent exclude patterns forwarded to sandboxes
    #[arg(long, requires = "includes")]
    pub excludes: Option<String>,

    /// Seconds to wait for connected agents when closing
    #[arg(long)]
    pub drain_timeout: Option<u64>,

    /// Delete an existing output file before listening
    #[arg(long)]
    pub clean: bool,

    /// Write the listening port to this file
    #[arg(long)]
    pub port_file: Option<PathBuf>,

    /// Sandbox project to forward the listener settings to (repeatable)
    #[arg(long = "forward-to")]
    pub forward_to: Vec<PathBuf>,

    /// Close after this many seconds instead of waiting for a signal
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Debug, clap::Args)]
pub struct ForwardArgs {
    /// Sandbox project directory containing (or receiving) gradle.properties
    pub project_dir: PathBuf,

    /// Listener port
    #[arg(short, long)]
    pub port: u16,

    /// Agent session id (default: random)
    #[arg(long)]
    pub session_id: Option<String>,

    /// Agent include patterns
    #[arg(long, requires = "excludes")]
    pub includes: Option<String>,

    /// Agent exclude patterns
    #[arg(long, requires = "includes")]
    pub excludes: Option<String>,

    /// Also print the -javaagent argument for this agent jar
    #[arg(long, env = "COVMERGE_JAVAAGENT")]
    pub javaagent: Option<PathBuf>,

    /// Print the properties without touching the project
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["covmerge", "--json", "--no-color", "-v", "env"]);
        assert_eq!(cli.effective_format(), OutputFormat::Json);
        assert!(cli.no_color);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::parse_from(["covmerge", "serve", "-o", "it.exec"]);
        let Commands::Serve(args) = cli.command else {
            panic!("Expected Serve command, got {:?}", cli.command);
        };
        assert_eq!(args.output, PathBuf::from("it.exec"));
        assert!(args.includes.is_none());
        assert!(args.forward_to.is_empty());
        assert!(!args.clean);
        assert!(args.duration.is_none());
    }

    #[test]
    fn test_serve_repeated_forward_to() {
        let cli = Cli::parse_from([
            "covmerge",
            "serve",
            "-o",
            "it.exec",
            "--forward-to",
            "a",
            "--forward-to",
            "b",
        ]);
        let Commands::Serve(args) = cli.command else {
            panic!("Expected Serve command, got {:?}", cli.command);
        };
        assert_eq!(args.forward_to, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn test_filters_must_come_in_pairs() {
        let result = Cli::try_parse_from([
            "covmerge",
            "forward",
            "proj",
            "--port",
            "1",
            "--includes",
            "com.*",
        ]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "covmerge",
            "forward",
            "proj",
            "--port",
            "1",
            "--includes",
            "com.*",
            "--excludes",
            "",
        ])
        .unwrap();
        let Commands::Forward(args) = cli.command else {
            panic!("Expected Forward command, got {:?}", cli.command);
        };
        assert_eq!(args.excludes.as_deref(), Some(""));
    }

    #[test]
    fn test_inspect_merged_flag() {
        let cli = Cli::parse_from(["covmerge", "inspect", "it.exec", "--merged"]);
        let Commands::Inspect { file, merged } = cli.command else {
            panic!("Expected Inspect command, got {:?}", cli.command);
        };
        assert_eq!(file, PathBuf::from("it.exec"));
        assert!(merged);
    }
}
