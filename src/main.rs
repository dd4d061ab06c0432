//! hostblock — block hosts for a while by editing the system hosts file.
//!
//! Usage:
//!   hostblock block <duration> <list-file>   # timed session, unblocks on expiry or Ctrl-C
//!   hostblock block <name>...                # block until explicitly unblocked
//!   hostblock unblock [<name>...] [--all]     # interactive selection when no names are given
//!   hostblock list                           # print blocked names
//!   hostblock default                        # rewrite the hosts file with stock content
//!   hostblock recover                        # finish a session left behind by a crash
//!
//! Editing the hosts file needs administrator/root privileges.

use clap::{Parser, Subcommand};
use hostblock::config::{self, Config};
use hostblock::ledger::SessionLedger;
use hostblock::session::{Cause, Completion, Recovery, SessionController};
use hostblock::store::BlockStore;
use hostblock::{targets, AppError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::warn;

/// Names that belong to the stock hosts file and are never offered for unblocking.
const SYSTEM_NAMES: &[&str] = &["localhost"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.hostblock/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hosts file to edit, overriding the config
    #[arg(long, global = true)]
    hosts_file: Option<PathBuf>,

    /// Skip flushing the OS DNS cache after changes
    #[arg(long, global = true)]
    no_flush_dns: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Block hosts: `<duration> <list-file>` for a timed session, or names to block now.
    Block {
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Unblock hosts. Without names, choose from the blocked list.
    Unblock {
        names: Vec<String>,
        /// Unblock every blocked host
        #[arg(long, conflicts_with = "names")]
        all: bool,
    },
    /// Print blocked hosts.
    List,
    /// Rewrite the hosts file with the stock minimal content.
    Default,
    /// Finish or resume a session left behind by a crashed process.
    Recover,
}

// =========================================================================
// Entry point
// =========================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match config::load(cli.config.as_deref()) {
        Ok(cfg) => {
            setup_logging(&cfg);
            run(cli, cfg).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Fatal: {e}");
        std::process::exit(1);
    }
}

fn setup_logging(cfg: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli, cfg: Config) -> Result<(), AppError> {
    let hosts_path = cli.hosts_file.unwrap_or(cfg.hosts_path);
    let store = BlockStore::new(hosts_path).with_dns_flush(cfg.flush_dns && !cli.no_flush_dns);

    let mut controller = SessionController::new(store);
    if cfg.session_ledger {
        controller = controller.with_ledger(SessionLedger::default_location());
    }

    match cli.command {
        Command::Block { args } => run_block(&controller, args).await,
        Command::Unblock { names, all } => run_unblock(&controller, names, all),
        Command::List => {
            for name in controller.list_blocked()? {
                println!("{name}");
            }
            Ok(())
        }
        Command::Default => {
            controller.restore_default()?;
            println!("Hosts file restored to defaults.");
            Ok(())
        }
        Command::Recover => run_recover(&controller).await,
    }
}

// =========================================================================
// Block
// =========================================================================

async fn run_block(controller: &SessionController, args: Vec<String>) -> Result<(), AppError> {
    if let [first, source] = args.as_slice() {
        if looks_like_duration(first) {
            let duration = targets::parse_duration(first)?;
            let names = targets::read_source_list(&PathBuf::from(source))?;
            return run_timed(controller, names, duration).await;
        }
    }

    controller.block_now(&args)?;
    println!("Blocked {} host(s).", args.len());
    Ok(())
}

/// A leading number selects the timed form; `parse_duration` then decides
/// whether it is well formed.
fn looks_like_duration(arg: &str) -> bool {
    arg.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        && arg.trim_end_matches(['s', 'm', 'h']).parse::<i64>().is_ok()
}

async fn run_timed(
    controller: &SessionController,
    names: Vec<String>,
    duration: Duration,
) -> Result<(), AppError> {
    println!(
        "Blocking {} host(s) for {}. Press Ctrl-C to unblock early.",
        names.len(),
        describe(duration)
    );
    let completion = controller
        .run_timed_block(names, Some(duration), interrupted())
        .await?;
    report(&completion);
    Ok(())
}

async fn run_recover(controller: &SessionController) -> Result<(), AppError> {
    match controller.recover()? {
        Recovery::Nothing => println!("No recorded session."),
        Recovery::Expired { targets } => {
            println!("Recorded session had expired; unblocked {} host(s).", targets.len());
        }
        Recovery::Resumed(session) => {
            match session.deadline() {
                Some(at) => println!(
                    "Resumed session for {} host(s), {} left. Press Ctrl-C to unblock early.",
                    session.targets().len(),
                    describe(at.saturating_duration_since(tokio::time::Instant::now()))
                ),
                None => println!(
                    "Resumed session for {} host(s). Press Ctrl-C to unblock.",
                    session.targets().len()
                ),
            }
            let completion = controller.run_until_complete(&session, interrupted()).await?;
            report(&completion);
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the session simply
/// runs to its deadline.
async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn report(completion: &Completion) {
    match completion.cause {
        Cause::Deadline => println!("Time is up. Hosts unblocked."),
        Cause::Cancelled => println!("Interrupted. Hosts unblocked."),
        Cause::EarlyUnblock => println!("Hosts unblocked early."),
    }
}

fn describe(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m} min"),
        (0, m, s) => format!("{m} min {s}s"),
        (h, m, _) => format!("{h}h {m:02} min"),
    }
}

// =========================================================================
// Unblock
// =========================================================================

fn run_unblock(
    controller: &SessionController,
    names: Vec<String>,
    all: bool,
) -> Result<(), AppError> {
    let chosen = if !names.is_empty() {
        names
    } else {
        let blocked: Vec<String> = controller
            .list_blocked()?
            .into_iter()
            .filter(|name| !SYSTEM_NAMES.contains(&name.as_str()))
            .collect();
        if blocked.is_empty() {
            println!("Nothing is blocked.");
            return Ok(());
        }
        if all {
            blocked
        } else {
            choose(&blocked)?
        }
    };

    if chosen.is_empty() {
        println!("Nothing selected.");
        return Ok(());
    }
    controller.unblock_now(&chosen)?;
    println!("Unblocked {} host(s).", chosen.len());
    Ok(())
}

/// Print the numbered list and read a selection like `1,3` or `all`.
fn choose(blocked: &[String]) -> Result<Vec<String>, AppError> {
    for (i, name) in blocked.iter().enumerate() {
        println!("{:>3}. {name}", i + 1);
    }
    let answer = prompt("Unblock which? (e.g. 1,3 or all; empty to cancel): ")?;
    parse_selection(&answer, blocked)
}

fn parse_selection(answer: &str, blocked: &[String]) -> Result<Vec<String>, AppError> {
    if answer.eq_ignore_ascii_case("all") {
        return Ok(blocked.to_vec());
    }

    let mut chosen = Vec::new();
    for part in answer.split([',', ' ']).filter(|p| !p.is_empty()) {
        let picked = part
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| blocked.get(i))
            .ok_or_else(|| AppError::InvalidTarget(part.to_string()))?;
        if !chosen.contains(picked) {
            chosen.push(picked.clone());
        }
    }
    Ok(chosen)
}

fn prompt(label: &str) -> Result<String, AppError> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Vec<String> {
        vec!["a.com".into(), "b.com".into(), "c.com".into()]
    }

    #[test]
    fn selection_by_number() {
        assert_eq!(parse_selection("1,3", &list()).unwrap(), vec!["a.com", "c.com"]);
        assert_eq!(parse_selection("2 2", &list()).unwrap(), vec!["b.com"]);
        assert_eq!(parse_selection("ALL", &list()).unwrap(), list());
        assert!(parse_selection("", &list()).unwrap().is_empty());
    }

    #[test]
    fn selection_out_of_range() {
        assert!(parse_selection("0", &list()).is_err());
        assert!(parse_selection("4", &list()).is_err());
        assert!(parse_selection("x", &list()).is_err());
    }

    #[test]
    fn duration_detection() {
        assert!(looks_like_duration("25"));
        assert!(looks_like_duration("90s"));
        assert!(looks_like_duration("0"));
        assert!(looks_like_duration("-5"));
        assert!(!looks_like_duration("example.com"));
        assert!(!looks_like_duration("1password.com"));
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe(Duration::from_secs(45)), "45s");
        assert_eq!(describe(Duration::from_secs(1500)), "25 min");
        assert_eq!(describe(Duration::from_secs(90)), "1 min 30s");
        assert_eq!(describe(Duration::from_secs(7260)), "2h 01 min");
    }

    #[test]
    fn cli_parses_both_block_forms() {
        let cli = Cli::try_parse_from(["hostblock", "block", "1", "list.txt"]).unwrap();
        assert!(matches!(cli.command, Command::Block { ref args } if args.len() == 2));

        let cli = Cli::try_parse_from(["hostblock", "--hosts-file", "/tmp/h", "unblock", "--all"])
            .unwrap();
        assert_eq!(cli.hosts_file, Some(PathBuf::from("/tmp/h")));
        assert!(matches!(cli.command, Command::Unblock { all: true, .. }));
    }
}
