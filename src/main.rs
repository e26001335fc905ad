//! BluePilot payment gate CLI
//!
//! Runs the metered HTTP API and offers offline helpers for payment proofs and
//! policy checks.

use alloy::primitives::utils::parse_units;
use alloy::primitives::{Address, U256};
use bluepilot_gate::config::env_vars;
use bluepilot_gate::http::{self, AppState};
use bluepilot_gate::payment::{PaymentConfig, PaymentGate, PaymentProof, PaymentSigner};
use bluepilot_gate::policy::{decimal_u256, InMemoryPolicyStore};
use bluepilot_gate::tokens;
use bluepilot_gate::upstream::vault::VaultRouterClient;
use bluepilot_gate::upstream::TradingBackend;
use bluepilot_gate::{
    ComplianceEngine, Config, Error, PaymentVerifier, Result, RpcConfig, TradeIntent, UserPolicy,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bluepilot-gate")]
#[command(about = "x402 payment gate and trading-policy compliance for the BluePilot agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check a PAYMENT-SIGNATURE header against the configured price of an operation
    VerifyPayment {
        /// Base64 header value
        #[arg(long)]
        header: String,

        /// Priced operation, e.g. /simulate
        #[arg(short, long, default_value = "/simulate")]
        operation: String,
    },

    /// Sign a payment proof with PAYER_PRIVATE_KEY and print the header value
    SignPayment {
        /// Recipient wallet
        #[arg(long)]
        pay_to: String,

        /// Amount in whole asset units, e.g. 0.001
        #[arg(long)]
        amount: String,

        /// CAIP-2 network id
        #[arg(short, long, default_value = "eip155:84532")]
        network: String,

        /// Asset contract (defaults to USDC on the network)
        #[arg(long)]
        asset: Option<String>,
    },

    /// Evaluate a trade intent against a policy
    CheckPolicy {
        #[arg(long)]
        token_in: String,

        #[arg(long)]
        token_out: String,

        /// Amount in smallest units
        #[arg(long)]
        amount_in: String,

        /// Requested slippage in basis points
        #[arg(long)]
        slippage_bps: Option<u16>,

        /// Policy JSON file (defaults to configured policy defaults)
        #[arg(long, conflicts_with = "user")]
        policy: Option<PathBuf>,

        /// Read this user's policy from the VaultRouter contract
        #[arg(long)]
        user: Option<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let fmt_layer = if cli.json_logs {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await?;
        }
        Commands::VerifyPayment { header, operation } => {
            run_verify_payment(&config, &header, &operation)?;
        }
        Commands::SignPayment {
            pay_to,
            amount,
            network,
            asset,
        } => {
            run_sign_payment(&pay_to, &amount, &network, asset.as_deref())?;
        }
        Commands::CheckPolicy {
            token_in,
            token_out,
            amount_in,
            slippage_bps,
            policy,
            user,
        } => {
            let intent = TradeIntent {
                token_in: parse_address("token-in", &token_in)?,
                token_out: parse_address("token-out", &token_out)?,
                amount_in: decimal_u256::parse(&amount_in).map_err(Error::InvalidArgument)?,
                max_slippage_bps: slippage_bps,
            };
            run_check_policy(&config, intent, policy, user).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn parse_address(field: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw)
        .map_err(|e| Error::InvalidArgument(format!("Invalid {} address {}: {}", field, raw, e)))
}

fn build_gate(config: &Config) -> Result<PaymentGate> {
    let payment = config
        .payment
        .as_ref()
        .map(PaymentConfig::from_settings)
        .transpose()?;
    Ok(PaymentGate::new(payment, config.server.resource_base_url()))
}

async fn run_server(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gate = Arc::new(build_gate(&config)?);
    let rpc = RpcConfig::from_env();
    let backend = VaultRouterClient::from_config(&config, &rpc)?
        .map(|client| Arc::new(client.with_shutdown(shutdown_rx.clone())) as Arc<dyn TradingBackend>);
    if backend.is_none() {
        tracing::warn!(
            "{} not set, simulate and execute will answer 503",
            env_vars::VAULT_ROUTER_ADDRESS
        );
    }

    let state = AppState {
        gate,
        policies: Arc::new(InMemoryPolicyStore::new(&config.policy_defaults)),
        backend,
        engine: ComplianceEngine::new(),
        vault_router: config.contracts.vault_router,
    };

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind {}: {}", addr, e)))?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
            let _ = shutdown_tx.send(true);
        }
    });

    http::serve(listener, state, shutdown_rx).await
}

fn run_verify_payment(config: &Config, header: &str, operation: &str) -> Result<()> {
    let settings = config.payment.as_ref().ok_or_else(|| {
        Error::Config("Payment gate is not configured (set the X402_* variables)".to_string())
    })?;
    let payment = PaymentConfig::from_settings(settings)?;
    let expected = payment.expected_for(operation);
    let proof = PaymentProof::decode_header(header)?;

    let now = chrono::Utc::now().timestamp();
    match PaymentVerifier::new().explain_at(&proof, &expected, now) {
        Ok(()) => println!("VALID: {} paid {} for {}", proof.payer, proof.amount, operation),
        Err(rejection) => println!("INVALID ({}): {}", rejection.check(), rejection),
    }
    Ok(())
}

fn run_sign_payment(pay_to: &str, amount: &str, network: &str, asset: Option<&str>) -> Result<()> {
    let signer = PaymentSigner::from_env(env_vars::PAYER_PRIVATE_KEY)?;
    let chain_id = bluepilot_gate::payment::proof::chain_id_from_network(network)?;
    let pay_to = parse_address("pay-to", pay_to)?;

    let registry = tokens::registry();
    let asset = match asset {
        Some(raw) => parse_address("asset", raw)?,
        None => registry.usdc_for_chain(chain_id).ok_or_else(|| {
            Error::InvalidArgument(format!("No known USDC on chain {}, pass --asset", chain_id))
        })?,
    };
    let decimals = registry.get_or_default(chain_id, &asset).decimals;
    let amount: U256 = parse_units(amount, decimals)
        .map_err(|e| Error::InvalidArgument(format!("Invalid amount {}: {}", amount, e)))?
        .get_absolute();

    let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    let header = signer.sign_header(pay_to, asset, amount, network, timestamp)?;

    tracing::info!(payer = %signer.address(), amount = %amount, "Payment header ready");
    println!("{}", header);
    Ok(())
}

async fn run_check_policy(
    config: &Config,
    intent: TradeIntent,
    policy_file: Option<PathBuf>,
    user: Option<String>,
) -> Result<()> {
    let policy: UserPolicy = match (policy_file, user) {
        (Some(path), _) => {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        }
        (None, Some(user)) => {
            let user = parse_address("user", &user)?;
            let client = VaultRouterClient::from_config(config, &RpcConfig::from_env())?
                .ok_or_else(|| {
                    Error::Config(format!("{} is required for --user", env_vars::VAULT_ROUTER_ADDRESS))
                })?;
            client.user_policy(user).await?
        }
        (None, None) => UserPolicy::from(&config.policy_defaults),
    };

    let verdict = ComplianceEngine::new().check(&policy, &intent, chrono::Utc::now().timestamp());
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
