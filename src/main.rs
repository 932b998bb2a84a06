use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civic_report::config::AppConfig;
use civic_report::severity::SeverityRules;
use civic_report::{api, db};

#[derive(Parser)]
#[command(name = "civic")]
#[command(about = "Civic issue reporting server with automatic severity tagging")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port for HTTP API
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        database: Option<PathBuf>,

        /// Directory for uploaded photos
        #[arg(long)]
        uploads: Option<PathBuf>,

        /// TOML file with severity keyword tiers
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Print the severity a report would be tagged with
    Classify {
        title: String,

        #[arg(default_value = "")]
        description: String,

        /// TOML file with severity keyword tiers
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Grant administrator rights to a registered user
    Promote {
        email: String,

        /// Revoke instead of grant
        #[arg(long)]
        revoke: bool,

        /// SQLite database file
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "civic_report=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let rules = config.load_rules()?;

    let db = db::Database::open(config.database.clone())?;
    db.migrate()?;
    tracing::info!("Using database {}", config.database.display());

    let state = api::AppState::from_config(db, rules, &config);
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("civic-report listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve {
            host,
            port,
            database,
            uploads,
            rules,
        }) => {
            let mut config = AppConfig::from_env()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(database) = database {
                config.database = database;
            }
            if let Some(uploads) = uploads {
                config.upload_dir = uploads;
            }
            if rules.is_some() {
                config.severity_rules = rules;
            }
            serve(config).await?;
        }
        Some(Commands::Classify {
            title,
            description,
            rules,
        }) => {
            let rules = match rules {
                Some(path) => SeverityRules::load(&path)?,
                None => SeverityRules::default(),
            };
            println!("{}", rules.classify(&title, &description));
        }
        Some(Commands::Promote {
            email,
            revoke,
            database,
        }) => {
            let path = match database {
                Some(path) => path,
                None => AppConfig::from_env()?.database,
            };
            let db = db::Database::open(path)?;
            db.migrate()?;

            if db.set_admin(&email, !revoke)? {
                let verb = if revoke { "revoked from" } else { "granted to" };
                println!("Admin rights {} {}", verb, email);
            } else {
                anyhow::bail!("No user registered with email {}", email);
            }
        }
        None => serve(AppConfig::from_env()?).await?,
    }

    Ok(())
}
