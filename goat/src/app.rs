use clap::{value_parser, Arg, ArgAction, ArgMatches, Command as ClapCommand};
use eyre::WrapErr;
use goat_core::{
    advancer::{Advancer, Manual, Ticker},
    executor::{Error as ExecError, Executor, Phase, RunResult},
    HttpRequester, Params, Printer, RhaiEngine,
};
use itertools::Itertools;
use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::*;

/// Requestfile written by `--new`.
const NEW_REQUESTFILE: &str = include_str!("new.goat");
const DEFAULT_NEW_NAME: &str = "tests.goat";
const LAST_FAILED_RUN_FILE: &str = "goat_last_failed_run";

/// Build the CLI with clap's builder pattern
fn build_cli() -> ClapCommand {
    ClapCommand::new("goat")
        .about("Automation tool for executing and evaluating API requests")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("files")
            .help("Requestfile(s) or directories containing requestfiles")
            .value_parser(value_parser!(PathBuf))
            .num_args(0..)
            .action(ArgAction::Append))
        .arg(Arg::new("args")
            .short('a')
            .long("args")
            .help("Pass params as key value arguments into the execution (format: key=value)")
            .action(ArgAction::Append))
        .arg(Arg::new("delay")
            .short('d')
            .long("delay")
            .env("GOATARG_DELAY")
            .help("Delay requests by the given duration, e.g. 500ms or 2s")
            .value_parser(humantime::parse_duration))
        .arg(Arg::new("dry")
            .long("dry")
            .help("Only parse the requestfile(s) without executing any requests")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("gradual")
            .short('g')
            .long("gradual")
            .help("Advance the requests manually")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("json")
            .long("json")
            .env("GOATARG_JSON")
            .help("Use JSON format instead of pretty console format for logging")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("loglevel")
            .short('l')
            .long("loglevel")
            .env("GOATARG_LOGLEVEL")
            .help("Logging level")
            .default_value("info"))
        .arg(Arg::new("new")
            .long("new")
            .help("Create a new base requestfile")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("no-abort")
            .long("no-abort")
            .env("GOATARG_NOABORT")
            .help("Do not abort batch execution on error")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("no-color")
            .long("no-color")
            .env("GOATARG_NOCOLOR")
            .help("Suppress colored output")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("params")
            .short('p')
            .long("params")
            .env("GOATARG_PARAMS")
            .help("Params file location(s)")
            .value_parser(value_parser!(PathBuf))
            .value_delimiter(',')
            .action(ArgAction::Append))
        .arg(Arg::new("profile")
            .short('P')
            .long("profile")
            .env("GOATARG_PROFILE")
            .help("Select a profile from your home config")
            .value_delimiter(',')
            .action(ArgAction::Append))
        .arg(Arg::new("reduced-errors")
            .short('R')
            .long("reduced-errors")
            .env("GOATARG_REDUCEDERRORS")
            .help("Hide template errors in teardown steps")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("secure")
            .long("secure")
            .env("GOATARG_SECURE")
            .help("Validate TLS certificates")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("silent")
            .short('s')
            .long("silent")
            .env("GOATARG_SILENT")
            .help("Disables all logging output")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("skip")
            .long("skip")
            .env("GOATARG_SKIP")
            .help("Section(s) to be skipped during execution [possible values: setup, tests, teardown]")
            .value_parser(|s: &str| s.parse::<Phase>())
            .value_delimiter(',')
            .action(ArgAction::Append))
        .arg(Arg::new("retry-failed")
            .long("retry-failed")
            .env("GOATARG_RETRYFAILED")
            .help("Retry files which have failed in the previous run")
            .action(ArgAction::SetTrue))
}

/// Parsed command line arguments.
#[derive(Debug, Clone, Default, PartialEq)]
struct Args {
    files: Vec<PathBuf>,
    args: Vec<String>,
    delay: Option<Duration>,
    dry: bool,
    gradual: bool,
    json: bool,
    log_level: String,
    new: bool,
    no_abort: bool,
    no_color: bool,
    params: Vec<PathBuf>,
    profiles: Vec<String>,
    reduced_errors: bool,
    secure: bool,
    silent: bool,
    skip: Vec<Phase>,
    retry_failed: bool,
}

impl Args {
    fn from_matches(matches: &ArgMatches) -> Args {
        fn many<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Vec<T> {
            matches
                .get_many::<T>(id)
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default()
        }

        Args {
            files: many(matches, "files"),
            args: many(matches, "args"),
            delay: matches.get_one::<Duration>("delay").copied(),
            dry: matches.get_flag("dry"),
            gradual: matches.get_flag("gradual"),
            json: matches.get_flag("json"),
            log_level: matches
                .get_one::<String>("loglevel")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            new: matches.get_flag("new"),
            no_abort: matches.get_flag("no-abort"),
            no_color: matches.get_flag("no-color"),
            params: many(matches, "params"),
            profiles: many(matches, "profile"),
            reduced_errors: matches.get_flag("reduced-errors"),
            secure: matches.get_flag("secure"),
            silent: matches.get_flag("silent"),
            skip: many(matches, "skip"),
            retry_failed: matches.get_flag("retry-failed"),
        }
    }
}

/// goat CLI.
#[derive(Default)]
pub struct App {}

impl App {
    pub fn new() -> App {
        App {}
    }

    /// Parse command-line args and run goat.
    pub async fn run(self) -> eyre::Result<()> {
        let matches = build_cli().get_matches();
        color_eyre::install()?;

        let args = Args::from_matches(&matches);
        init_logging(&args)?;

        if args.no_color || args.json {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }

        if args.new {
            let path = args
                .files
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NEW_NAME));
            create_requestfile(&path)?;
            info!(at = ?path, "Requestfile created");
            return Ok(());
        }

        let files = if args.retry_failed {
            let failed = load_failed_files(&last_failed_run_path())
                .wrap_err("failed loading last failed files")?;
            if failed.is_empty() {
                eyre::bail!("no failed files have been recorded in previous runs");
            }
            failed
        } else {
            args.files.clone()
        };

        if files.is_empty() {
            build_cli()
                .error(
                    clap::error::ErrorKind::MissingRequiredArgument,
                    "requestfile must be specified",
                )
                .exit();
        }

        let params = Params::load(&args.profiles, &args.params, &args.args)
            .wrap_err("failed loading parameters")?;

        let executor = build_executor(&args);
        let mut result = RunResult::default();
        let res = executor.execute(&files, params.state(), &mut result).await;
        executor.printer().summary(&result);

        match res {
            Err(err) => {
                report_failure(&err);
                Err(eyre::Report::new(err).wrap_err("execution failed"))
            }
            Ok(()) if result.failed() > 0 => {
                eyre::bail!("execution finished with {} failed requests", result.failed())
            }
            Ok(()) => {
                info!("Execution finished successfully");
                Ok(())
            }
        }
    }
}

fn init_logging(args: &Args) -> eyre::Result<()> {
    let level = if args.silent { "off" } else { args.log_level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .wrap_err_with(|| format!("invalid log level '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let res = if args.json {
        builder.json().try_init()
    } else {
        builder.with_ansi(!args.no_color).try_init()
    };
    res.map_err(|e| eyre::eyre!("failed to initialize logging: {e}"))
}

fn build_executor(args: &Args) -> Executor {
    let requester = Arc::new(HttpRequester::new(args.secure));
    let mut executor = Executor::new(Box::new(RhaiEngine::boxed), requester);
    executor.set_dry(args.dry);
    executor.set_no_abort(args.no_abort);
    executor.set_skip(args.skip.clone());
    executor.set_reduced_errors(args.reduced_errors);

    let printer = if args.silent || args.json {
        Printer::silent()
    } else {
        Printer::new(console::colors_enabled())
    };
    executor.set_printer(printer);

    if args.gradual {
        let manual = Arc::new(Manual::new());
        advance_manually(manual.clone());
        executor.set_waiter(manual);
    } else if let Some(delay) = args.delay {
        info!("Delay mode: advancing every {}", humantime::format_duration(delay));
        executor.set_waiter(Arc::new(Ticker::new(delay)));
    }

    executor
}

/// Advances `advancer` on every line read from stdin until `continue` is entered.
fn advance_manually(advancer: Arc<Manual>) {
    info!(
        "Gradual mode: Press [enter] to advance requests, \
         enter 'quit' / 'q' to quit the execution or \
         enter 'continue' / 'cont' / 'c' to stop gradual advancement."
    );

    let handle = tokio::runtime::Handle::current();
    // a plain thread does not keep the runtime from shutting down while blocked on stdin
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        let mut continuous = false;
        loop {
            if !continuous {
                match lines.next() {
                    Some(Ok(line)) => match line.trim().to_lowercase().as_str() {
                        "quit" | "q" => {
                            warn!("Aborted.");
                            std::process::exit(1);
                        }
                        "continue" | "cont" | "c" => continuous = true,
                        _ => {}
                    },
                    _ => continuous = true,
                }
            }
            handle.block_on(advancer.advance());
        }
    });
}

fn report_failure(err: &ExecError) {
    let ExecError::Batch { failures, .. } = err else {
        return;
    };

    for (path, err) in failures {
        error!(?path, "{err}");
    }

    let files: Vec<&PathBuf> = err.failed_files();
    if let Err(e) = store_failed_files(&last_failed_run_path(), &files) {
        error!("failed storing latest failed files: {e:#}");
    }
}

fn create_requestfile(path: &Path) -> eyre::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed creating directory {}", dir.display()))?;
    }
    std::fs::write(path, NEW_REQUESTFILE)
        .wrap_err_with(|| format!("failed creating new requestfile at {}", path.display()))
}

fn last_failed_run_path() -> PathBuf {
    std::env::temp_dir().join(LAST_FAILED_RUN_FILE)
}

fn store_failed_files(path: &Path, files: &[&PathBuf]) -> eyre::Result<()> {
    let content = files.iter().map(|file| file.display()).join("\n");
    std::fs::write(path, content).wrap_err("failed to write last failed run")
}

/// Files recorded by the last failed batch run. Nothing recorded yields an empty list.
fn load_failed_files(path: &Path) -> eyre::Result<Vec<PathBuf>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).wrap_err("failed to read last failed run")?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect())
}
