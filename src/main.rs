use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url_decipher::config::Config;
use url_decipher::metadata::MetadataClient;
use url_decipher::server::{create_router, AppState, SharedState};
use url_decipher::{generate_url_variations, DecipherOptions, DecipherReport, Decipherer, Session};

#[derive(Parser)]
#[command(name = "url-decipher", version, about = "Turns vague website descriptions into likely URLs")]
struct Cli {
    /// Config file (defaults to $URL_DECIPHER_CONFIG, then ~/.config/url-decipher/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Guess the URL for one description
    Guess {
        #[arg(required = true)]
        description: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Read descriptions line by line; only the newest answer is shown
    Interactive {
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// List the URL variations that would be probed
    Variations { url: String },
    /// Probe variations of a URL against the metadata service
    Validate {
        url: String,
        #[arg(short, long)]
        max_attempts: Option<usize>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Clone, Copy)]
struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Copy)]
struct ProbeArgs {
    /// Probe URL variations after guessing
    #[arg(long)]
    validate: bool,
    #[arg(short, long)]
    max_attempts: Option<usize>,
}

impl From<ProbeArgs> for DecipherOptions {
    fn from(args: ProbeArgs) -> Self {
        DecipherOptions {
            validate: args.validate,
            max_attempts: args.max_attempts,
        }
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("url_decipher=debug".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
    Ok(())
}

fn print_report(report: &DecipherReport, output: OutputArgs) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = Config::load_auto(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Guess {
            description,
            output,
            probe,
        } => {
            let decipherer = Decipherer::from_config(&config)?;
            let report = decipherer
                .decipher(&description.join(" "), &probe.into())
                .await?;
            print_report(&report, output)
        }
        Command::Interactive { output, probe } => interactive(&config, output, probe).await,
        Command::Variations { url } => {
            for variation in generate_url_variations(&url)? {
                println!("{}", variation);
            }
            Ok(())
        }
        Command::Validate {
            url,
            max_attempts,
            output,
        } => {
            let client = MetadataClient::from_config(&config)?;
            let outcome = client
                .find_valid_url(&url, max_attempts.unwrap_or(config.metadata.max_attempts))
                .await?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                for attempt in &outcome.attempts {
                    let detail = match (&attempt.status, &attempt.error) {
                        (_, Some(err)) => err.clone(),
                        (Some(status), None) => format!("HTTP {}", status),
                        (None, None) => String::new(),
                    };
                    let mark = if attempt.valid { "ok" } else { "--" };
                    println!("{} {} {}", mark, attempt.url, detail);
                }
                let verdict = if outcome.validated { "validated" } else { "unvalidated" };
                println!("{} ({})", outcome.url, verdict);
            }
            Ok(())
        }
    }
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    info!("url-decipher API starting");

    let listener_addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );

    let state: SharedState = Arc::new(AppState {
        decipherer: Decipherer::from_config(&config)?,
    });
    let app = create_router(state);

    let listener = TcpListener::bind(&listener_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listener_addr))?;
    info!("Server listening on http://{}", listener_addr);

    axum::serve(listener, app).await.map_err(|e| {
        error!("Server error: {}", e);
        e.into()
    })
}

async fn interactive(config: &Config, output: OutputArgs, probe: ProbeArgs) -> Result<()> {
    let decipherer = Arc::new(Decipherer::from_config(config)?);
    let session: Arc<Session<DecipherReport>> = Arc::new(Session::new());
    let options: DecipherOptions = probe.into();

    eprintln!("Describe a website you're trying to remember (Ctrl-D to quit):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let description = line.trim().to_string();
        if description.is_empty() {
            continue;
        }

        let generation = session.begin().await;
        let decipherer = decipherer.clone();
        let session = session.clone();
        let options = options.clone();

        tasks.push(tokio::spawn(async move {
            match decipherer.decipher(&description, &options).await {
                Ok(report) => {
                    session
                        .complete_with(generation, report, |report| {
                            if let Err(e) = print_report(report, output) {
                                error!("Failed to print result: {}", e);
                            }
                        })
                        .await;
                }
                Err(e) => {
                    session
                        .if_current(generation, || eprintln!("Error: {}", e))
                        .await;
                }
            }
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Request task failed: {}", e);
        }
    }
    Ok(())
}
