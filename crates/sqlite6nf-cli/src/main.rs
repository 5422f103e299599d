//! sqlite6nf: entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use sqlite6nf::TransactionTime;
use sqlite6nf_cli::commands::{self, parse_time};
use sqlite6nf_cli::config::{resolve_database_path, resolve_options};

#[derive(Parser)]
#[command(
    name = "sqlite6nf",
    about = "Temporal history for SQLite tables: 6NF shadow relations and point-in-time reads",
    version
)]
struct Cli {
    /// Path to the SQLite database.
    /// Also reads from SQLITE6NF_DATABASE env var.
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Busy timeout in milliseconds.
    /// Also reads from SQLITE6NF_TIMEOUT_MS env var.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Historize tables (every eligible table when none are named).
    Normalize {
        /// Tables to historize.
        tables: Vec<String>,
    },

    /// Classify SQL statements and list their FROM/JOIN references.
    Classify {
        /// SQL text.
        sql: String,
    },

    /// Run SQL and print every result set as JSON.
    Exec {
        /// SQL text.
        sql: String,

        /// Read tracked tables as they were at this time.
        #[arg(long, value_parser = parse_time)]
        as_of: Option<TransactionTime>,
    },

    /// List tracked tables and their columns.
    Tables,

    /// Print the catalog history of a tracked table.
    History {
        /// Table name.
        table: String,
    },

    /// Print the point-in-time rewrite of SQL without running it.
    Rewrite {
        /// SQL text.
        sql: String,

        /// Time to read tracked tables at.
        #[arg(long, value_parser = parse_time)]
        as_of: TransactionTime,
    },

    /// Print the effective database and connection options as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   sqlite6nf completions bash > ~/.local/share/bash-completion/completions/sqlite6nf
    ///   sqlite6nf completions zsh > ~/.zfunc/_sqlite6nf
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode (default).
    Repl,
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let database = resolve_database_path(cli.database.as_deref());
    let options = resolve_options(cli.timeout_ms);
    tracing::debug!("Database: {database}");

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Normalize { tables } => {
            let conn = commands::open(&database, options)?;
            print_json(&commands::normalize(&conn, &tables)?)?;
        }

        Commands::Classify { sql } => {
            print_json(&commands::classify(&sql))?;
        }

        Commands::Exec { sql, as_of } => {
            let conn = commands::open(&database, options)?;
            print_json(&commands::exec(&conn, &sql, as_of)?)?;
        }

        Commands::Tables => {
            let conn = commands::open(&database, options)?;
            print_json(&commands::tables(&conn)?)?;
        }

        Commands::History { table } => {
            let conn = commands::open(&database, options)?;
            print_json(&commands::history(&conn, &table)?)?;
        }

        Commands::Rewrite { sql, as_of } => {
            let conn = commands::open(&database, options)?;
            println!("{}", commands::rewrite(&conn, &sql, as_of)?);
        }

        Commands::Info => {
            print_json(&commands::info(&database, &options))?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sqlite6nf", &mut std::io::stdout());
        }

        Commands::Repl => {
            sqlite6nf_cli::repl::run(&database, options)?;
        }
    }

    Ok(())
}
