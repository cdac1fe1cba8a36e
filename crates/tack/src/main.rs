//! CLI entry point for tack.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;
mod workspace;

/// Cards on boards, kept in a JSON data file.
#[derive(Parser, Debug)]
#[command(name = "tack", version, about = "tack: cards, boards, mentions and saved filters")]
struct Cli {
    /// Project directory holding `.tack/` (defaults to current).
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Email of the acting user.
    #[arg(long = "as", global = true)]
    acting_as: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the account with its first user and board.
    Init {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "Main")]
        board: String,
        #[arg(short = 'c', long = "column")]
        columns: Vec<String>,
    },

    /// Add a user, optionally granting board access.
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(short = 'b', long = "board")]
        boards: Vec<String>,
    },

    /// Add a board; the acting user becomes a member.
    AddBoard {
        #[arg(long)]
        name: String,
        #[arg(short = 'c', long = "column")]
        columns: Vec<String>,
        #[arg(short = 'm', long = "member")]
        members: Vec<String>,
    },

    /// Create a card.
    New {
        #[arg(long)]
        board: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        column: Option<String>,
        #[arg(short = 't', long = "tag")]
        tags: Vec<String>,
    },

    /// Change a card's title or description.
    Edit {
        card: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Comment on a card.
    Comment {
        card: String,
        #[arg(long)]
        message: String,
    },

    /// Show a card with its comments.
    Show { card: String },

    /// List cards matching the given criteria.
    Ls(LsArgs),

    /// Close a card.
    Close { card: String },

    /// Reopen a closed card.
    Reopen { card: String },

    /// Postpone a card into NOT NOW.
    Postpone { card: String },

    /// Bring a postponed card back to triage.
    Resume { card: String },

    /// Send a card back to triage.
    Triage { card: String },

    /// Move a card into a column, or DONE / NOT NOW / MAYBE?.
    Move { card: String, column: String },

    /// Toggle a user's assignment.
    Assign { card: String, email: String },

    /// Toggle a tag.
    Tag { card: String, title: String },

    /// Re-run mention and link extraction for a card.
    Extract {
        card: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
struct LsArgs {
    #[arg(short = 'b', long = "board")]
    boards: Vec<String>,
    #[arg(long)]
    column: Option<String>,
    #[arg(short = 'a', long = "assignee")]
    assignees: Vec<String>,
    #[arg(long)]
    unassigned: bool,
    #[arg(long = "creator")]
    creators: Vec<String>,
    #[arg(long = "closer")]
    closers: Vec<String>,
    #[arg(short = 't', long = "tag")]
    tags: Vec<String>,
    /// Creation window, e.g. `today`, `last week`, `past 3 days`, `2024-05-01`.
    #[arg(long)]
    created: Option<String>,
    /// Closure window.
    #[arg(long)]
    closed: Option<String>,
    /// `all`, `closed` or `not_now`.
    #[arg(long)]
    status: Option<String>,
    /// `latest`, `newest` or `oldest`.
    #[arg(long)]
    sort: Option<String>,
    /// Card numbers or text.
    terms: Vec<String>,
    /// Remember these criteria as a saved filter.
    #[arg(long)]
    save: bool,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let Cli { dir, acting_as, cmd } = Cli::parse();
    install_tracing();
    commands::run(&dir, acting_as.as_deref(), cmd)
}

fn install_tracing() {
    // RUST_LOG is honoured; INFO otherwise.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_new_command() {
        let cli = Cli::parse_from([
            "tack", "--as", "alice@example.com", "new", "--board", "Product", "--title", "Fix login", "--tag",
            "bug", "--column", "Doing",
        ]);
        assert_eq!(cli.acting_as.as_deref(), Some("alice@example.com"));
        match cli.cmd {
            Command::New {
                board,
                title,
                column,
                tags,
                ..
            } => {
                assert_eq!(board, "Product");
                assert_eq!(title, "Fix login");
                assert_eq!(column.as_deref(), Some("Doing"));
                assert_eq!(tags, vec!["bug"]);
            }
            _ => panic!("expected new command"),
        }
    }

    #[test]
    fn parse_ls_with_terms_and_flags() {
        let cli = Cli::parse_from([
            "tack", "ls", "--column", "not now", "--sort", "oldest", "--created", "last week", "42", "urgent",
            "--save",
        ]);
        match cli.cmd {
            Command::Ls(args) => {
                assert_eq!(args.column.as_deref(), Some("not now"));
                assert_eq!(args.sort.as_deref(), Some("oldest"));
                assert_eq!(args.created.as_deref(), Some("last week"));
                assert_eq!(args.terms, vec!["42", "urgent"]);
                assert!(args.save);
                assert!(!args.json);
            }
            _ => panic!("expected ls command"),
        }
    }

    #[test]
    fn acting_user_is_accepted_after_the_subcommand() {
        let cli = Cli::parse_from(["tack", "move", "#12", "DONE", "--as", "kmc@example.com"]);
        assert_eq!(cli.acting_as.as_deref(), Some("kmc@example.com"));
        match cli.cmd {
            Command::Move { card, column } => {
                assert_eq!(card, "#12");
                assert_eq!(column, "DONE");
            }
            _ => panic!("expected move command"),
        }
    }

    #[test]
    fn extract_defaults_to_unforced() {
        let cli = Cli::parse_from(["tack", "extract", "3"]);
        assert!(matches!(cli.cmd, Command::Extract { force: false, .. }));
    }
}
