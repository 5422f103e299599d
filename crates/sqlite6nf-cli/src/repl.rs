//! Interactive REPL over a temporal database.
//!
//! Launch with `sqlite6nf repl`. Lines starting with `/` are commands,
//! anything else is SQL run against the open database.
//! Type `/help` for available commands, Tab for completion.

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

use sqlite6nf::{ConnectOptions, TemporalConnection, TransactionTime};

use crate::commands;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/normalize", "Historize tables (all eligible when none given)"),
    ("/tables", "List tracked tables"),
    ("/history", "Show catalog history of a tracked table"),
    ("/asof", "Read tracked tables as of a time, or 'off'"),
    ("/classify", "Classify SQL without running it"),
    ("/rewrite", "Show the point-in-time rewrite of SQL"),
    ("/info", "Show database and connection options"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
#[derive(Default)]
struct TemporalHelper {
    /// Table names offered after `/normalize` and `/history`.
    tables: Vec<String>,
}

impl Completer for TemporalHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if input.starts_with('/') && !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        if cmd == "/normalize" || cmd == "/history" {
            let word_start = input.rfind(' ').map_or(0, |i| i + 1);
            let prefix = &input[word_start..];
            let matches: Vec<Pair> = self
                .tables
                .iter()
                .filter(|t| t.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
                .map(|t| Pair {
                    display: t.clone(),
                    replacement: format!("{t} "),
                })
                .collect();
            return Ok((word_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for TemporalHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for TemporalHelper {}
impl Validator for TemporalHelper {}
impl Helper for TemporalHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Session state.
struct ReplState {
    database: String,
    conn: TemporalConnection,
    as_of: Option<TransactionTime>,
}

/// Run the interactive REPL.
pub fn run(database: &str, options: ConnectOptions) -> anyhow::Result<()> {
    let conn = commands::open(database, options)?;

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1msqlite6nf v{}\x1b[0m \x1b[90m{database}\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Type SQL to run it, \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<TemporalHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(TemporalHelper::default()));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".sqlite6nf_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        database: database.to_string(),
        conn,
        as_of: None,
    };

    loop {
        if let Some(helper) = rl.helper_mut() {
            helper.tables = table_names(&state.conn);
        }
        let prompt = match state.as_of {
            Some(at) => format!(" \x1b[33m{at}\x1b[0m \x1b[36msql>\x1b[0m "),
            None => " \x1b[36msql>\x1b[0m ".to_string(),
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some(input) = line.strip_prefix('/') else {
                    cmd_sql(line, &state);
                    continue;
                };
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "normalize" => cmd_normalize(args, &state),
                    "tables" => cmd_tables(&state),
                    "history" => cmd_history(args, &state),
                    "asof" => cmd_asof(args, &mut state),
                    "classify" => print_json(&commands::classify(args)),
                    "rewrite" => cmd_rewrite(args, &state),
                    "info" => print_json(&commands::info(&state.database, state.conn.options())),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn table_names(conn: &TemporalConnection) -> Vec<String> {
    let sql = "SELECT name FROM sqlite_schema WHERE type = 'table' ORDER BY name";
    match conn.query(sql, &[], None) {
        Ok(rows) => rows
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(sqlite6nf::Value::Text(name)) => Some(name),
                _ => None,
            })
            .filter(|name| !sqlite6nf::catalog::is_reserved_name(name))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: {e}"),
    }
}

fn report(result: anyhow::Result<serde_json::Value>) {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => eprintln!("  Error: {e:#}"),
    }
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Anything not starting with '/' is run as SQL.");
    eprintln!("  Tip: Tab completion works for commands and table names.");
    eprintln!();
}

fn cmd_sql(sql: &str, state: &ReplState) {
    report(commands::exec(&state.conn, sql, state.as_of));
}

fn cmd_normalize(args: &str, state: &ReplState) {
    let tables: Vec<String> = args.split_whitespace().map(String::from).collect();
    report(commands::normalize(&state.conn, &tables));
}

fn cmd_tables(state: &ReplState) {
    report(commands::tables(&state.conn));
}

fn cmd_history(args: &str, state: &ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /history <table>");
        return;
    }
    report(commands::history(&state.conn, args));
}

fn cmd_asof(args: &str, state: &mut ReplState) {
    match args {
        "" => match state.as_of {
            Some(at) => eprintln!("  Reading as of {at}"),
            None => eprintln!("  Reading current state"),
        },
        "off" | "now" => {
            state.as_of = None;
            eprintln!("  Reading current state");
        }
        raw => match commands::parse_time(raw) {
            Ok(at) => {
                state.as_of = Some(at);
                eprintln!("  Reading as of {at}");
            }
            Err(e) => eprintln!("  {e}"),
        },
    }
}

fn cmd_rewrite(args: &str, state: &ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /rewrite <sql>");
        return;
    }
    let at = state.as_of.unwrap_or_else(TransactionTime::now);
    match commands::rewrite(&state.conn, args, at) {
        Ok(sql) => println!("{sql}"),
        Err(e) => eprintln!("  Error: {e:#}"),
    }
}
