//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// famtasks - shared family task list
#[derive(Parser)]
#[command(
    name = "ft",
    about = "Shared family task list with natural-language task entry",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Who is asking: an explicit family, or a user whose membership names one
#[derive(Debug, Clone, Default, Args)]
pub struct Scope {
    /// Family (group key) the command acts on
    #[arg(short, long)]
    pub family: Option<String>,

    /// User whose family membership is used when --family is absent
    #[arg(short, long)]
    pub user: Option<String>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Add a task from free text, e.g. "dentist for Ava next Tuesday at 3pm"
    Add {
        /// Free-text task description
        text: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Add a task by hand, without the language model
    New {
        /// Task title
        title: String,

        /// Comma-separated participant names
        #[arg(short, long)]
        participants: Option<String>,

        /// Due date-time (RFC 3339 or YYYY-MM-DDTHH:MM, local)
        #[arg(short, long)]
        due: Option<String>,

        #[command(flatten)]
        scope: Scope,
    },

    /// List the family's tasks
    List {
        #[command(flatten)]
        scope: Scope,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Mark a task done (removes it)
    Done {
        /// Task ID (or unique prefix/slug fragment)
        id: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Delete a task
    Rm {
        /// Task ID (or unique prefix/slug fragment)
        id: String,

        #[command(flatten)]
        scope: Scope,
    },

    /// Resolve a date phrase without storing anything
    When {
        /// Phrase such as "next Friday at noon"
        phrase: String,

        /// Reference time (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<String>,
    },

    /// Record that a user belongs to a family
    Member {
        /// User ID
        user: String,

        /// Family (group key)
        family: String,
    },

    /// Print the task list whenever it changes
    Watch {
        #[command(flatten)]
        scope: Scope,

        /// Seconds between store polls
        #[arg(long, default_value = "2")]
        interval: u64,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("famtasks")
        .join("logs")
        .join("famtasks.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for listing commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["ft"]).is_err());
    }

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["ft", "serve", "--bind", "0.0.0.0:9000"]);
        assert!(matches!(cli.command, Command::Serve { bind: Some(ref b) } if b == "0.0.0.0:9000"));

        let cli = Cli::parse_from(["ft", "serve"]);
        assert!(matches!(cli.command, Command::Serve { bind: None }));
    }

    #[test]
    fn test_cli_parse_add() {
        let cli = Cli::parse_from(["ft", "add", "Buy milk tomorrow", "--family", "smiths"]);
        match cli.command {
            Command::Add { text, scope } => {
                assert_eq!(text, "Buy milk tomorrow");
                assert_eq!(scope.family.as_deref(), Some("smiths"));
                assert!(scope.user.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_new() {
        let cli = Cli::parse_from([
            "ft",
            "new",
            "Fix tap",
            "-p",
            "Sam, Alex",
            "--due",
            "2024-05-20T08:00",
            "-u",
            "sam",
        ]);
        match cli.command {
            Command::New {
                title,
                participants,
                due,
                scope,
            } => {
                assert_eq!(title, "Fix tap");
                assert_eq!(participants.as_deref(), Some("Sam, Alex"));
                assert_eq!(due.as_deref(), Some("2024-05-20T08:00"));
                assert_eq!(scope.user.as_deref(), Some("sam"));
                assert!(scope.family.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_list_format() {
        let cli = Cli::parse_from(["ft", "list", "-f", "smiths", "--format", "json"]);
        assert!(matches!(cli.command, Command::List { format: OutputFormat::Json, .. }));

        let cli = Cli::parse_from(["ft", "list", "-f", "smiths"]);
        assert!(matches!(cli.command, Command::List { format: OutputFormat::Text, .. }));

        assert!(Cli::try_parse_from(["ft", "list", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_cli_parse_done_and_rm() {
        let cli = Cli::parse_from(["ft", "done", "a1b2c3", "-f", "smiths"]);
        assert!(matches!(cli.command, Command::Done { ref id, .. } if id == "a1b2c3"));

        let cli = Cli::parse_from(["ft", "rm", "a1b2c3", "-f", "smiths"]);
        assert!(matches!(cli.command, Command::Rm { ref id, .. } if id == "a1b2c3"));
    }

    #[test]
    fn test_cli_parse_when() {
        let cli = Cli::parse_from(["ft", "when", "next friday", "--now", "2024-05-15T10:00:00Z"]);
        assert!(matches!(
            cli.command,
            Command::When { ref phrase, now: Some(ref now) } if phrase == "next friday" && now == "2024-05-15T10:00:00Z"
        ));
    }

    #[test]
    fn test_cli_parse_member() {
        let cli = Cli::parse_from(["ft", "member", "sam", "smiths"]);
        assert!(matches!(
            cli.command,
            Command::Member { ref user, ref family } if user == "sam" && family == "smiths"
        ));
    }

    #[test]
    fn test_cli_parse_watch_default_interval() {
        let cli = Cli::parse_from(["ft", "watch", "-f", "smiths"]);
        assert!(matches!(cli.command, Command::Watch { interval: 2, .. }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from(["ft", "when", "tomorrow", "-l", "debug", "-c", "/tmp/ft.yml"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ft.yml")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("famtasks/logs/famtasks.log"));
    }
}
