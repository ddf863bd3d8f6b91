use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::api::{self, actions};
use keygate::cli::{self, Cli, Commands, EnvelopeCommands, TokenCommands};
use keygate::config::{self, Config};
use keygate::crypto::keys::{fingerprint, KeyPairOptions};
use keygate::crypto::{seal, verify, SignedPayload};
use keygate::models::token::{NewToken, TokenType};
use keygate::pipeline::provision::provision;
use keygate::pipeline::Pipeline;
use keygate::store::memory::MemoryTokenStore;
use keygate::store::postgres::PgTokenStore;
use keygate::store::TokenStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Token { command }) => {
            let store = open_store(&cfg).await?;
            handle_token_command(command, store.as_ref(), &cfg).await
        }
        Some(Commands::Envelope { command }) => handle_envelope_command(command),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "keygate=debug,tower_http=debug".into()),
    );
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn TokenStore>> {
    match cfg.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgTokenStore::connect(url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!("no DATABASE_URL; using the in-memory token store");
            Ok(Arc::new(MemoryTokenStore::new()))
        }
    }
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;

    let pipeline_cfg = cfg.pipeline_config();
    tracing::info!(
        public = ?pipeline_cfg.public_actions,
        unencrypted = ?pipeline_cfg.unencrypted_actions,
        "pipeline configured"
    );
    let pipeline = Arc::new(Pipeline::new(
        store,
        Arc::new(actions::builtin_actions()),
        pipeline_cfg,
    ));

    let app = api::router(pipeline, cfg.max_body_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keygate listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn handle_token_command(
    cmd: TokenCommands,
    store: &dyn TokenStore,
    cfg: &Config,
) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Create {
            user_id,
            unlimited,
            limit,
            window,
            bits,
        } => {
            if cfg.database_url.is_none() {
                eprintln!(
                    "⚠️  no DATABASE_URL: this token only exists for the lifetime of this command."
                );
            }
            let new = NewToken {
                user_id,
                token_type: if unlimited {
                    TokenType::Unlimited
                } else {
                    TokenType::Limited
                },
                api_limit: limit.unwrap_or(cfg.default_api_limit),
                window_seconds: window.unwrap_or(cfg.default_window_seconds),
                access_token: None,
            };
            let key_opts = KeyPairOptions {
                bits: bits.unwrap_or(cfg.key_bits),
                digest: cfg.digest,
                ..KeyPairOptions::default()
            };

            let record = provision(store, new, key_opts).await?;
            println!(
                "Token created:\n  ID:           {}\n  User:         {}\n  Access token: {}\n  Type:         {}\n  Limit:        {} per {}s\n  Digest:       {}\n  Fingerprint:  {}\n\n{}",
                record.id,
                record.user_id,
                record.access_token,
                record.token_type.as_str(),
                record.api_limit,
                record.window_seconds,
                record.digest,
                fingerprint(&record.public_key)?,
                record.public_key,
            );
        }
        TokenCommands::Revoke { id } => {
            let id = uuid::Uuid::parse_str(&id).context("Invalid token ID")?;
            if store.deactivate(id).await? {
                println!("Token {} deactivated.", id);
            } else {
                println!("Token not found.");
            }
        }
    }
    Ok(())
}

fn handle_envelope_command(cmd: cli::EnvelopeCommands) -> anyhow::Result<()> {
    match cmd {
        EnvelopeCommands::Seal { public_key, json } => {
            let pem = std::fs::read_to_string(&public_key)
                .with_context(|| format!("reading {}", public_key.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&json).context("--json is not valid JSON")?;
            println!("{}", seal(&pem, &payload)?);
        }
        EnvelopeCommands::Verify {
            public_key,
            signed,
            digest,
        } => {
            let pem = std::fs::read_to_string(&public_key)
                .with_context(|| format!("reading {}", public_key.display()))?;
            let signed: SignedPayload =
                serde_json::from_str(&signed).context("--signed is not a signed payload")?;
            if verify(&pem, &signed, digest)? {
                println!("Signature OK");
            } else {
                anyhow::bail!("signature does not match");
            }
        }
    }
    Ok(())
}
