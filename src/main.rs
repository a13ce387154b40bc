use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use gcal::calendar::google::auth::{self, Authenticator};
use gcal::calendar::google::GoogleCalendarClient;
use gcal::calendar::output::{self, OutputFormat};
use gcal::calendar::{self, Event, ListOptions, SortKey, TimeWindow};
use gcal::{version, AppConfig};
use std::io::{self, Write};
use std::path::PathBuf;

/// Results per calendar for `today` and `updates`.
const SHORT_LIST_LIMIT: u32 = 10;

#[derive(Parser)]
#[command(name = "gcal", author, version, about = "Google Calendar cli client", long_about = None)]
struct Cli {
    /// Config file (default is $HOME/.config/gcal/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Calendar IDs to query instead of the configured ones
    #[arg(
        short = 'c',
        long,
        value_name = "ID",
        value_delimiter = ',',
        global = true
    )]
    calendar_id_list: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate with Google Calendar API using OAuth
    ///
    /// Initiates the OAuth flow to obtain and save access tokens. Only applicable when auth_type
    /// is set to "oauth" in config.
    Auth,
    /// List calendar events
    List(ListArgs),
    /// Day's events as JSON
    Day {
        /// Date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Today's events as JSON
    Today,
    /// Upcoming events updated since a date, as JSON
    Updates {
        /// Since date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        since: Option<String>,
    },
    /// Show version information
    Version {
        /// Show only version number
        #[arg(short, long)]
        short: bool,
    },
}

#[derive(Args)]
struct ListArgs {
    /// Date to list events (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    date: Option<String>,

    /// Start date for range query (YYYY-MM-DD)
    #[arg(short, long)]
    since: Option<String>,

    /// End date for range query (YYYY-MM-DD)
    #[arg(short, long, requires = "since")]
    to: Option<String>,

    /// Maximum number of results per calendar
    #[arg(short = 'n', long, default_value_t = 0)]
    max_results: u32,

    /// Output format: table, json
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Sort by: start, updated
    #[arg(long, default_value = "start")]
    sort: String,

    /// Include declined events
    #[arg(long)]
    include_declined: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Version { short } => {
            if short {
                println!("{}", version::short());
            } else {
                println!("{}", version::info());
            }
            Ok(())
        }
        Command::Auth => {
            let config = load_config(&cli.config, &cli.calendar_id_list)?;
            let authenticated =
                auth::authenticate(&config, &mut io::stdin().lock(), &mut io::stdout())
                    .await
                    .context("Authentication failed")?;
            if authenticated {
                println!("Authentication successful!");
            }
            Ok(())
        }
        Command::List(args) => {
            let config = load_config(&cli.config, &cli.calendar_id_list)?;
            list(&config, args).await
        }
        Command::Day { date } => {
            let config = load_config(&cli.config, &cli.calendar_id_list)?;
            let window = TimeWindow::day(&date.unwrap_or_else(today))?;
            let client = connect(&config).await?;
            let mut events =
                calendar::fetch_events(&client, &config.calendar_id_list, &window, None).await?;
            calendar::sort_events(&mut events, SortKey::Start);
            print_events(&events, OutputFormat::Json)
        }
        Command::Today => {
            let config = load_config(&cli.config, &cli.calendar_id_list)?;
            let window = TimeWindow::day(&today())?;
            let client = connect(&config).await?;
            let mut events = calendar::fetch_events(
                &client,
                &config.calendar_id_list,
                &window,
                Some(SHORT_LIST_LIMIT),
            )
            .await?;
            calendar::sort_events(&mut events, SortKey::Start);
            print_events(&events, OutputFormat::Json)
        }
        Command::Updates { since } => {
            let config = load_config(&cli.config, &cli.calendar_id_list)?;
            let since = TimeWindow::range(&since.unwrap_or_else(today), None)?.min;
            let client = connect(&config).await?;
            let mut events = calendar::fetch_updated_since(
                &client,
                &config.calendar_id_list,
                Local::now().fixed_offset(),
                since,
                Some(SHORT_LIST_LIMIT),
            )
            .await?;
            calendar::sort_events(&mut events, SortKey::Start);
            print_events(&events, OutputFormat::Json)
        }
    }
}

async fn list(config: &AppConfig, args: ListArgs) -> anyhow::Result<()> {
    // Reject unknown formats before a possibly interactive login.
    args.output.parse::<OutputFormat>()?;

    let window = match &args.since {
        Some(since) => TimeWindow::range(since, args.to.as_deref())?,
        None => TimeWindow::day(&args.date.unwrap_or_else(today))?,
    };

    let options = ListOptions {
        window,
        max_results: args.max_results,
        include_declined: args.include_declined,
        sort: args.sort,
        format: args.output,
    };

    let client = connect(config).await?;
    let rendered = calendar::list(&client, &config.calendar_id_list, &options).await?;

    write_stdout(&rendered)
}

fn load_config(path: &Option<PathBuf>, calendar_ids: &[String]) -> anyhow::Result<AppConfig> {
    AppConfig::load(path.as_deref(), calendar_ids).context("Unable to load configuration")
}

async fn connect(config: &AppConfig) -> anyhow::Result<GoogleCalendarClient> {
    let token_source = Authenticator::from_config(config)
        .map_err(gcal::Error::from)?
        .token_source()
        .await
        .map_err(gcal::Error::from)
        .context("Unable to create gcal service")?;

    Ok(GoogleCalendarClient::new(token_source).map_err(gcal::Error::from)?)
}

/// Renders the complete output before writing so that failures never leave partial output.
fn print_events(events: &[Event], format: OutputFormat) -> anyhow::Result<()> {
    write_stdout(&output::render(events, format)?)
}

fn write_stdout(rendered: &str) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;

    Ok(())
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
