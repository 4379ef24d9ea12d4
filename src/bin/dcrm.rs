//! DCRM command-line tool.
//!
//! Runs the registration engine against in-memory stores configured from the
//! environment. Useful for checking how a registration request, a set of
//! redirect URIs or a software statement is treated before wiring the engine
//! into a server.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Register a client
//! dcrm register --name "My Client" \
//!   --redirect-uri https://rp.example/cb \
//!   --grant-type authorization_code
//!
//! # Register from a JSON request body
//! dcrm register --request request.json
//!
//! # Show the callback URL stored for several redirect URIs
//! dcrm callback-url --redirect-uri https://a.example/cb --redirect-uri https://b.example/cb
//!
//! # Read (and with DCRM_SSA_JWKS set, verify) a software statement
//! dcrm verify-statement --statement eyJhbGciOi...
//! ```
//!
//! Exit codes: 0 on success, 2 when the request is rejected, 1 otherwise.

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dcrm::{
    config::Config,
    dcr::{
        DcrmService, JwksSoftwareStatementVerifier, RegistrationRequest, RequestContext,
        ServiceSettings, build_callback_url,
        validators::redirect_uris_from_callback_url, verify_software_statement,
    },
    errors::DcrmError,
    storage::{MemoryTenantDirectory, Stores},
};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::prelude::*;

/// Main CLI application structure
#[derive(Parser)]
#[command(
    name = "dcrm",
    about = "OAuth2/OIDC dynamic client registration tool",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Tenant the request is addressed to
    #[arg(long, default_value = "carbon.super")]
    tenant: String,

    /// Authenticated user making the request
    #[arg(long)]
    user: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "json-pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// JSON formatted output
    Json,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Register a new OAuth client
    Register(RegisterArgs),
    /// Show the callback URL stored for a set of redirect URIs
    CallbackUrl(CallbackUrlArgs),
    /// Read a software statement, verifying it when a JWKS URL is configured
    VerifyStatement(VerifyStatementArgs),
}

/// Arguments for client registration
#[derive(Args)]
struct RegisterArgs {
    /// JSON registration request; flags override its fields
    #[arg(long)]
    request: Option<String>,

    /// Client name
    #[arg(long)]
    name: Option<String>,

    /// Redirect URI (can be specified multiple times)
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,

    /// Grant type (can be specified multiple times)
    #[arg(long = "grant-type")]
    grant_types: Vec<String>,

    /// Client id to register instead of a generated one
    #[arg(long)]
    client_id: Option<String>,

    /// Service provider template
    #[arg(long)]
    template: Option<String>,

    /// Software statement (signed JWT)
    #[arg(long)]
    software_statement: Option<String>,
}

/// Arguments for callback URL construction
#[derive(Args)]
struct CallbackUrlArgs {
    /// Redirect URI (can be specified multiple times)
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,

    /// Grant type (can be specified multiple times)
    #[arg(long = "grant-type", default_value = "authorization_code")]
    grant_types: Vec<String>,
}

/// Arguments for software statement verification
#[derive(Args)]
struct VerifyStatementArgs {
    /// Software statement (signed JWT)
    #[arg(long)]
    statement: String,

    /// JWKS URL overriding DCRM_SSA_JWKS
    #[arg(long)]
    jwks_url: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dcrm=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        match error.downcast_ref::<DcrmError>() {
            Some(rejection) if rejection.is_client_error() => {
                eprintln!(
                    "{}",
                    json!({"error": rejection.code(), "error_description": rejection.to_string()})
                );
                process::exit(2);
            }
            _ => {
                eprintln!("Error: {error:#}");
                process::exit(1);
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::new()?;
    tracing::debug!(version = %config.version, "configuration loaded");

    match cli.command {
        Commands::Register(args) => {
            let directory = MemoryTenantDirectory::new()
                .with_default_configuration(config.default_dcr_configuration());
            let verifier = JwksSoftwareStatementVerifier::new(config.jwks_cache_config())?;
            let service = DcrmService::new(
                Stores::memory(directory),
                Arc::new(verifier),
                ServiceSettings::from_config(&config),
            );

            let request = registration_request(args).await?;
            let mut ctx = RequestContext::new(cli.tenant);
            if let Some(user) = cli.user {
                ctx = ctx.with_user(user);
            }
            let application = service.register_application(&ctx, request).await?;
            print(&cli.format, &application)
        }
        Commands::CallbackUrl(args) => {
            let callback_url = build_callback_url(&args.redirect_uris, &args.grant_types)?;
            let redirect_uris = redirect_uris_from_callback_url(&callback_url);
            print(
                &cli.format,
                &json!({"callback_url": callback_url, "redirect_uris": redirect_uris}),
            )
        }
        Commands::VerifyStatement(args) => {
            let mut configuration = config.default_dcr_configuration();
            if args.jwks_url.is_some() {
                configuration.ssa_jwks = args.jwks_url;
            }
            let verifier = JwksSoftwareStatementVerifier::new(config.jwks_cache_config())?;
            let claims =
                verify_software_statement(&verifier, &configuration, Some(&args.statement)).await?;
            print(
                &cli.format,
                &json!({
                    "verified": configuration.ssa_jwks_url().is_some(),
                    "claims": claims,
                }),
            )
        }
    }
}

async fn registration_request(args: RegisterArgs) -> Result<RegistrationRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let body = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<RegistrationRequest>(&body)?
        }
        None => RegistrationRequest::default(),
    };

    if let Some(name) = args.name {
        request.client_name = name;
    }
    if !args.redirect_uris.is_empty() {
        request.redirect_uris = args.redirect_uris;
    }
    if !args.grant_types.is_empty() {
        request.grant_types = args.grant_types;
    }
    if args.client_id.is_some() {
        request.client_id = args.client_id;
    }
    if args.template.is_some() {
        request.ext_param_sp_template = args.template;
    }
    if args.software_statement.is_some() {
        request.software_statement = args.software_statement;
    }
    Ok(request)
}

fn print<T: Serialize>(format: &OutputFormat, value: &T) -> Result<()> {
    let output = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{output}");
    Ok(())
}
