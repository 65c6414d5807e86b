use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lms_core::model::CurriculumVersion;
use services::{ClientConfig, LearningSession, ProgressView, SessionError, SyncStatus};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// How long a one-shot command waits for the server to acknowledge a write.
const SYNC_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { command: &'static str, name: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidVersion { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { command, name } => {
                write!(f, "{command} requires <{name}>")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidVersion { raw } => write!(f, "invalid --version value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tkx [options] <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login <user>     sign in and sync progress");
    eprintln!("  logout           forget the signed-in user");
    eprintln!("  whoami           print the signed-in user");
    eprintln!("  list             exercises by section with completion marks");
    eprintln!("  status           completion percentage and where to continue");
    eprintln!("  complete <id>    mark an exercise complete");
    eprintln!("  current <id>     set the exercise you are working on");
    eprintln!("  show <id>        print one exercise");
    eprintln!("  watch            stay connected and print progress as it changes");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --api <url>        API base URL");
    eprintln!("  --live <host:port> live update endpoint");
    eprintln!("  --cache-dir <dir>  local cache directory");
    eprintln!("  --version <tag>    curriculum version ({})", version_tags());
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TKX_API_BASE_URL, TKX_LIVE_ADDR, TKX_CACHE_DIR, TKX_VERSION, TKX_HTTP_TIMEOUT_SECS, RUST_LOG");
}

fn version_tags() -> String {
    CurriculumVersion::ALL
        .iter()
        .map(|version| version.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login(String),
    Logout,
    Whoami,
    List,
    Status,
    Complete(String),
    Current(String),
    Show(String),
    Watch,
}

impl Command {
    fn parse(name: &str, rest: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut arg = |command: &'static str, what: &'static str| {
            rest.next().ok_or(ArgsError::MissingArgument {
                command,
                name: what,
            })
        };
        Ok(match name {
            "login" => Self::Login(arg("login", "user")?),
            "logout" => Self::Logout,
            "whoami" => Self::Whoami,
            "list" => Self::List,
            "status" => Self::Status,
            "complete" => Self::Complete(arg("complete", "id")?),
            "current" => Self::Current(arg("current", "id")?),
            "show" => Self::Show(arg("show", "id")?),
            "watch" => Self::Watch,
            other => return Err(ArgsError::UnknownCommand(other.to_string())),
        })
    }
}

struct Args {
    command: Command,
    api: Option<String>,
    live: Option<String>,
    cache_dir: Option<PathBuf>,
    version: Option<CurriculumVersion>,
}

impl Args {
    /// Flags may appear before or after the command.
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut api = None;
        let mut live = None;
        let mut cache_dir = None;
        let mut version = None;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api" => api = Some(require_value(&mut args, "--api")?),
                "--live" => live = Some(require_value(&mut args, "--live")?),
                "--cache-dir" => {
                    cache_dir = Some(PathBuf::from(require_value(&mut args, "--cache-dir")?));
                }
                "--version" => {
                    let raw = require_value(&mut args, "--version")?;
                    version = Some(
                        raw.parse()
                            .map_err(|_| ArgsError::InvalidVersion { raw: raw.clone() })?,
                    );
                }
                "--help" | "-h" => return Ok(None),
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let Some(name) = positional.next() else {
            return Ok(None);
        };
        let command = Command::parse(&name, &mut positional)?;
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }

        Ok(Some(Self {
            command,
            api,
            live,
            cache_dir,
            version,
        }))
    }

    fn config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = ClientConfig::from_env()?;
        if let Some(api) = &self.api {
            config = config.with_api_base_url(api)?;
        }
        if let Some(live) = &self.live {
            config.live_addr = Some(live.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if let Some(version) = self.version {
            config.version = version;
        }
        Ok(config)
    }
}

async fn signed_in(session: &mut LearningSession) -> Result<ProgressView, SessionError> {
    session.start().await?.ok_or(SessionError::NotSignedIn)
}

fn print_status(view: &ProgressView) {
    println!(
        "{} on {}: {}% complete ({}/{})",
        view.user, view.version, view.percent, view.completed, view.total
    );
    for section in &view.sections {
        println!("  {:<13} {}/{}", section.section.as_str(), section.completed, section.total);
    }
    if let Some(current) = &view.current {
        println!("current: {current}");
    }
    match &view.next {
        Some(next) => println!("next:    {next}"),
        None if view.total > 0 && view.completed == view.total => println!("all exercises complete"),
        None => {}
    }
    if let Some(at) = view.last_accessed {
        println!("last active: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    if view.sync == SyncStatus::Pending {
        println!("sync pending: changes are saved locally and will be retried");
    }
}

fn print_list(view: &ProgressView) {
    for section in &view.sections {
        println!("{} ({}/{})", section.section.as_str(), section.completed, section.total);
        for item in &section.exercises {
            let mark = if item.completed { "x" } else { " " };
            let pointer = if item.current { ">" } else { " " };
            let estimate = item
                .time_estimate
                .as_deref()
                .map(|range| format!("  [{range} min]"))
                .unwrap_or_default();
            println!("{pointer} [{mark}] {:<24} {}{estimate}", item.id.as_str(), item.title);
        }
    }
}

async fn finish(session: &mut LearningSession) {
    if !session.shutdown(SYNC_GRACE).await {
        eprintln!("server not reachable; progress is saved locally and will sync next time");
    }
}

async fn watch(session: &mut LearningSession) -> Result<(), Box<dyn std::error::Error>> {
    let view = signed_in(session).await?;
    if session.live_state().is_none() {
        eprintln!("no live endpoint configured; set --live or TKX_LIVE_ADDR");
    }
    print_status(&view);

    let mut changes = session.progress().watch_changes();
    let mut last_percent = view.percent;
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(view) = session.view() else {
                    continue;
                };
                if view.percent != last_percent {
                    last_percent = view.percent;
                    println!("{}% complete ({}/{})", view.percent, view.completed, view.total);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    finish(session).await;
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    let config = args.config()?;
    debug!(api = %config.api_base_url, cache = %config.cache_dir.display(), "configuration loaded");
    let mut session = LearningSession::from_config(&config)?;

    match args.command {
        Command::Login(input) => {
            let view = session.login(&input).await?;
            print_status(&view);
            finish(&mut session).await;
        }
        Command::Logout => match session.logout().await {
            Some(user) => println!("signed out {user}"),
            None => println!("not signed in"),
        },
        Command::Whoami => match session.user() {
            Some(user) => println!("{user}"),
            None => return Err(SessionError::NotSignedIn.into()),
        },
        Command::List => {
            let view = signed_in(&mut session).await?;
            print_list(&view);
            finish(&mut session).await;
        }
        Command::Status => {
            let view = signed_in(&mut session).await?;
            print_status(&view);
            finish(&mut session).await;
        }
        Command::Complete(id) => {
            signed_in(&mut session).await?;
            if session.mark_complete(&id)? {
                println!("completed {id}");
            } else {
                println!("{id} was already complete");
            }
            if let Some(view) = session.view() {
                println!("{}% complete", view.percent);
            }
            finish(&mut session).await;
        }
        Command::Current(id) => {
            signed_in(&mut session).await?;
            session.set_current(&id)?;
            println!("working on {id}");
            finish(&mut session).await;
        }
        Command::Show(id) => {
            signed_in(&mut session).await?;
            let exercise = session.exercise(&id).await?;
            println!("{} ({}, {})", exercise.title(), exercise.id(), exercise.section().as_str());
            if let Some(range) = exercise.time_estimate() {
                println!("estimated time: {range} min");
            }
            println!();
            println!("{}", exercise.content());
            finish(&mut session).await;
        }
        Command::Watch => watch(&mut session).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
