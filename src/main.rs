use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::{Parser, Subcommand};
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::PathBuf;

use decentra_ledger::api::{self, handlers, MiningControl};
use decentra_ledger::blockchain::{self, Blockchain};
use decentra_ledger::config::LedgerConfig;
use decentra_ledger::demo;

#[derive(Parser)]
#[command(name = "decentra_ledger", about = "Proof-of-work ledger with signed transactions")]
struct Cli {
    /// JSON config file; `LEDGER_*` variables override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Leading zero hex characters required in a block hash
    #[arg(long)]
    difficulty: Option<usize>,

    /// Amount minted per mined block
    #[arg(long)]
    reward: Option<f64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API (default)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Seal blocks on all cores, allowing cancellation
        #[arg(long)]
        parallel: bool,
    },

    /// Run the scripted walkthrough and print the result
    Demo,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::mine_block,
        handlers::cancel_mining,
        handlers::validate_chain,
        handlers::create_wallet,
        handlers::get_wallet_balance,
        handlers::get_difficulty,
        handlers::set_difficulty
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::AccountKey,
            blockchain::DigitalSignature,
            handlers::ChainResponse,
            handlers::TransactionRequest,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::ValidationResponse,
            handlers::WalletResponse,
            handlers::BalanceResponse,
            handlers::DifficultyBody
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "0.1.0",
        description = "A proof-of-work ledger API",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

fn load_config(cli: &Cli) -> anyhow::Result<LedgerConfig> {
    let base = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    let mut config = base.with_env_overrides()?;

    if let Some(difficulty) = cli.difficulty {
        config.difficulty = difficulty;
    }
    if let Some(reward) = cli.reward {
        config.mining_reward = reward;
    }
    if let Some(Command::Serve { host, port, parallel }) = &cli.command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
        config.parallel_mining |= *parallel;
    }

    Ok(config)
}

async fn serve(config: LedgerConfig) -> anyhow::Result<()> {
    let blockchain = web::Data::new(Blockchain::new(config.difficulty, config.mining_reward)?);
    let mining = web::Data::new(MiningControl::new(config.parallel_mining));

    info!(
        "Starting HTTP server at http://{}:{} (difficulty {}, reward {}, parallel mining {})",
        config.host, config.port, config.difficulty, config.mining_reward, config.parallel_mining
    );

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .app_data(mining.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Some(Command::Demo) => {
            let report = demo::run_demo(config.difficulty, config.mining_reward)?;
            print!("{}", report);
            Ok(())
        }
        Some(Command::Serve { .. }) | None => serve(config).await,
    }
}
