use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finddef::config::{load_config, resolve_tree_path, LocationPolicy};
use finddef::output::{render_text, to_json, TextStyle};
use finddef::provider::CSharpProvider;
use finddef::query::{FailureCategory, QueryDispatcher, QueryOutcome, QueryRequest};
use finddef::server::{run_stdio_server, ServerState};
use finddef::session::SessionCache;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "finddef")]
#[command(version)]
#[command(about = "Go to definition across a multi-project C# tree")]
struct Cli {
    /// Tree to load: .sln, .slnx, .csproj, a source directory, or a configured alias
    #[arg(value_name = "TREE")]
    tree: Option<String>,

    /// List every in-source declaration with exactly this name
    #[arg(long, value_name = "NAME", conflicts_with = "pos")]
    name: Option<String>,

    /// Resolve the symbol at FILE LINE COLUMN (0-based unless --one-based)
    #[arg(long, num_args = 3, value_names = ["FILE", "LINE", "COLUMN"])]
    pos: Option<Vec<String>>,

    /// Case-insensitive name match
    #[arg(long, requires = "name")]
    ignore_case: bool,

    /// LINE and COLUMN given to --pos are 1-based, as editors display them
    #[arg(long, requires = "pos")]
    one_based: bool,

    /// Emit the result as JSON instead of text
    #[arg(long)]
    json: bool,

    /// One record per part of a partial declaration instead of the first only
    #[arg(long)]
    all_locations: bool,

    /// Give up loading the tree after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Debug logging on stderr
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start MCP stdio server (tree stays loaded between queries)
    Mcp,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(outcome: &QueryOutcome) -> ExitCode {
    match outcome.failure.as_ref().map(|f| f.category) {
        None => ExitCode::SUCCESS,
        Some(FailureCategory::ProviderLoad) => ExitCode::from(1),
        Some(FailureCategory::Configuration) => ExitCode::from(2),
        Some(_) => ExitCode::from(3),
    }
}

fn usage_error(msg: &str) -> ExitCode {
    eprintln!("Error: {msg}");
    eprintln!("Usage: finddef <TREE> --name <NAME> | --pos <FILE> <LINE> <COLUMN>");
    ExitCode::from(2)
}

fn position_request(pos: &[String], one_based: bool) -> Result<QueryRequest, String> {
    let [file, line, column] = pos else {
        return Err("--pos takes FILE LINE COLUMN".to_string());
    };
    let parse = |what: &str, v: &str| -> Result<u32, String> {
        let n: u32 = v.parse().map_err(|_| format!("{what} must be a non-negative integer, got '{v}'"))?;
        if one_based {
            n.checked_sub(1).ok_or_else(|| format!("{what} is 1-based with --one-based, got 0"))
        } else {
            Ok(n)
        }
    };
    Ok(QueryRequest::ByPosition {
        document: PathBuf::from(file),
        line: parse("line", line)?,
        column: parse("column", column)?,
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let cfg = load_config(&cwd);

    let timeout = cli.timeout.or(cfg.load_timeout_secs).map(Duration::from_secs);
    let provider = Arc::new(CSharpProvider::new(cfg.scan.clone()));
    let cache = SessionCache::new(provider).with_timeout(timeout);
    let policy = if cli.all_locations {
        LocationPolicy::AllInSource
    } else {
        cfg.location_policy
    };
    let mut dispatcher = QueryDispatcher::new(cache, policy).with_warning_limit(cfg.warning_limit);

    if matches!(cli.cmd, Some(Command::Mcp)) {
        let mut state = ServerState::new(dispatcher, cfg);
        run_stdio_server(&mut state)?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(tree) = cli.tree.as_deref() else {
        return Ok(usage_error("missing TREE"));
    };
    let (request, style) = match (&cli.name, &cli.pos) {
        (Some(name), _) => (
            QueryRequest::ByName {
                name: name.clone(),
                case_sensitive: !cli.ignore_case,
            },
            TextStyle::ByName,
        ),
        (None, Some(pos)) => match position_request(pos, cli.one_based) {
            Ok(r) => (r, TextStyle::ByPosition),
            Err(msg) => return Ok(usage_error(&msg)),
        },
        (None, None) => return Ok(usage_error("one of --name or --pos is required")),
    };

    let tree_path = resolve_tree_path(tree, &cfg);
    tracing::debug!(input = tree, tree = %tree_path.display(), "resolved tree");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(format!("loading {}...", tree_path.display()));
    let outcome = dispatcher.query(&tree_path, &request);
    spinner.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&outcome))?);
    } else {
        print!("{}", render_text(&outcome, style));
    }

    Ok(exit_code(&outcome))
}
