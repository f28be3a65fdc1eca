use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use whaleminer_adapters::export::export_table;
use whaleminer_adapters::http::HttpConsoleClient;
use whaleminer_core::collectors::{CollectorBoard, COLLECTOR_COLUMNS};
use whaleminer_core::config::{default_config_dir, ConsoleConfig, FileConfigStore};
use whaleminer_core::download::{download_file_name, ResultDownloadApi};
use whaleminer_core::history::{HistoryApi, HISTORY_COLUMNS};
use whaleminer_core::lifecycle::{AppliedEvent, LifecycleConfig, QueryLifecycleController};
use whaleminer_core::metadata::MetadataApi;
use whaleminer_core::result_table::ResultTable;
use whaleminer_tui::TuiError;

const LOG_FILE_NAME: &str = "whaleminer.log";

#[derive(Debug, Parser)]
#[command(name = "whaleminer", version, about = "Terminal console for the WhaleMiner SQL service")]
struct Cli {
    /// Config file, defaults to `<config dir>/config.toml`.
    #[arg(long, env = "WHALEMINER_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "WHALEMINER_BASE_URL")]
    base_url: Option<String>,
    /// Deployment prefix such as `sql` or `sqldemo`.
    #[arg(long, env = "WHALEMINER_BASE_PATH")]
    base_path: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    /// Raise log verbosity; repeat for trace output.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive console (default).
    Tui {
        /// Where downloads and exports are written.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Submit one query and wait for its result.
    Query(QueryArgs),
    /// Print the metadata tree.
    Meta,
    /// List previously submitted queries.
    History,
    /// List data collectors.
    Collectors,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(long)]
    app: String,
    #[arg(long = "app-version")]
    version: String,
    /// Write the result table to a `.csv` or `.json` file.
    #[arg(long)]
    export: Option<PathBuf>,
    /// Fetch the full result file into this directory.
    #[arg(long)]
    download: Option<PathBuf>,
    sql: String,
}

fn run_app(
    run_tui: impl FnOnce() -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    run_tui()?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ConsoleConfig, Box<dyn Error>> {
    let store = match &cli.config {
        Some(path) => FileConfigStore::load_from_path(path)?,
        None => FileConfigStore::load_default()?,
    };
    let mut config = store.into_config();
    if let Some(base_url) = &cli.base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(base_path) = &cli.base_path {
        config.base_path.clone_from(base_path);
    }
    if let Some(user_id) = &cli.user_id {
        config.user_id = Some(user_id.clone());
    }
    config.validate()?;
    Ok(config)
}

fn log_dir(cli: &Cli) -> Result<PathBuf, Box<dyn Error>> {
    match cli.config.as_deref().and_then(Path::parent) {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(default_config_dir()?),
    }
}

fn init_logging(dir: &Path, verbose: u8) -> Result<WorkerGuard, Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        return Err(error.to_string().into());
    }
    Ok(guard)
}

fn run_headless(config: &ConsoleConfig, command: Command) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let client = Arc::new(HttpConsoleClient::from_config(config)?);

    runtime.block_on(async move {
        match command {
            Command::Query(args) => run_query(client, config, args).await,
            Command::Meta => print_metadata(&client).await,
            Command::History => print_history(&client).await,
            Command::Collectors => print_collectors(client).await,
            Command::Tui { .. } => Ok(()),
        }
    })
}

async fn run_query(
    client: Arc<HttpConsoleClient>,
    config: &ConsoleConfig,
    args: QueryArgs,
) -> Result<(), Box<dyn Error>> {
    let (mut controller, mut events) =
        QueryLifecycleController::new(Arc::clone(&client), LifecycleConfig::from_console(config));
    let tab_id = controller.workspace().active_id();
    let handle = controller
        .submit(&tab_id, Some(args.app.as_str()), Some(args.version.as_str()), &args.sql)
        .await
        .map_err(|error| error.user_message())?;
    tracing::info!(job = %handle.job_id, "query submitted from the command line");

    while let Some(event) = events.recv().await {
        let Some(applied) = controller.apply(event) else {
            continue;
        };
        let Some(tab) = controller.workspace().tab(&tab_id) else {
            break;
        };
        match applied {
            AppliedEvent::Succeeded => {
                let Some(table) = tab.result() else {
                    break;
                };
                print_table(table);
                println!("{}", tab.elapsed_label());
                if let Some(path) = &args.export {
                    let rows = export_table(path, table)?;
                    println!("{} ({rows})", path.display());
                }
                if let Some(dir) = &args.download {
                    download(client.as_ref(), table, dir).await?;
                }
                return Ok(());
            }
            AppliedEvent::Failed => {
                for line in tab.log().tail(tab.log().len()) {
                    eprintln!("{line}");
                }
                return Err(whaleminer_core::labels::STATUS_FAILED.into());
            }
            AppliedEvent::Unreachable => {
                let notice = tab.notice().unwrap_or_default().to_string();
                return Err(notice.into());
            }
            AppliedEvent::Progressed | AppliedEvent::Ticked => {}
        }
    }
    Err("query polling stopped before a terminal status".into())
}

fn print_table(table: &ResultTable) {
    println!("{}", table.titles().join("\t"));
    for row in table.rows() {
        println!("{}", row.join("\t"));
    }
    println!("{}", table.caption());
}

async fn download(
    client: &HttpConsoleClient,
    table: &ResultTable,
    dir: &Path,
) -> Result<(), Box<dyn Error>> {
    let Some(url) = table.download_url() else {
        return Err(whaleminer_core::labels::NO_DOWNLOAD.into());
    };
    let destination = dir.join(download_file_name(url));
    let bytes = client
        .download_result(url, &destination)
        .await
        .map_err(|error| error.user_message())?;
    println!("{} ({bytes} B)", destination.display());
    Ok(())
}

async fn print_metadata(client: &HttpConsoleClient) -> Result<(), Box<dyn Error>> {
    let tree = client.fetch_tree().await.map_err(|error| error.user_message())?;
    for row in tree.visible_rows(&tree.expandable_paths()) {
        println!("{}{} ({})", "  ".repeat(row.depth), row.label, row.type_label);
    }
    Ok(())
}

async fn print_history(client: &HttpConsoleClient) -> Result<(), Box<dyn Error>> {
    let entries = client.list_jobs().await.map_err(|error| error.user_message())?;
    println!("{}", HISTORY_COLUMNS.join(" | "));
    for entry in entries {
        println!("{}", entry.cells().join(" | "));
    }
    Ok(())
}

async fn print_collectors(client: Arc<HttpConsoleClient>) -> Result<(), Box<dyn Error>> {
    let collectors = CollectorBoard::new(client)
        .list()
        .await
        .map_err(|error| error.user_message())?;
    println!("{}", COLLECTOR_COLUMNS.join(" | "));
    for collector in collectors {
        println!("{}", collector.cells().join(" | "));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_logging(&log_dir(&cli)?, cli.verbose)?;
    tracing::info!(base_url = %config.base_url, base_path = %config.base_path, "starting");

    match cli.command {
        None => run_app(|| whaleminer_tui::run(&config, PathBuf::from("."))),
        Some(Command::Tui { output_dir }) => run_app(|| whaleminer_tui::run(&config, output_dir)),
        Some(command) => run_headless(&config, command),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use clap::Parser;
    use tempfile::TempDir;

    use super::{load_config, log_dir, run_app, Cli, Command};

    #[test]
    fn run_app_returns_ok_when_tui_runner_succeeds() {
        let result = run_app(|| Ok(()));
        assert!(result.is_ok());
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let result = run_app(|| Err(whaleminer_tui::TuiError::Io(io::Error::other("boom"))));
        assert!(result.is_err());
    }

    #[test]
    fn query_subcommand_parses_target_and_sql() {
        let cli = Cli::try_parse_from([
            "whaleminer",
            "query",
            "--app",
            "Shop",
            "--app-version",
            "v1",
            "--export",
            "out.csv",
            "select 1",
        ])
        .expect("arguments parse");

        let Some(Command::Query(args)) = cli.command else {
            panic!("expected query subcommand");
        };
        assert_eq!(args.app, "Shop");
        assert_eq!(args.version, "v1");
        assert_eq!(args.export, Some(PathBuf::from("out.csv")));
        assert_eq!(args.sql, "select 1");
    }

    #[test]
    fn command_line_overrides_file_config() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "base_url = \"http://file:8080\"\nbase_path = \"sql\"\n")
            .expect("write config");

        let cli = Cli::try_parse_from([
            "whaleminer",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--base-path",
            "sqldemo",
            "meta",
        ])
        .expect("arguments parse");
        let config = load_config(&cli).expect("config loads");

        assert_eq!(config.base_url, "http://file:8080");
        assert_eq!(config.base_path, "sqldemo");
        assert_eq!(log_dir(&cli).expect("log dir"), temp_dir.path());
    }
}
