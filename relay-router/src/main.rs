mod config;
mod observability;

use bytes::Bytes;
use clap::{Args, Parser};
use config::{Config, ConfigError};
use coordinator::{StoreError, SystemClock};
use engine::{BuildError, RelayPool, RouteError, RoutingEngine};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(version, about = "Routes HTTP requests through a coordinated relay pool")]
enum CliCommand {
    /// Loads and validates a config file
    CheckConfig(ConfigArgs),
    /// Prints the pool fingerprint and the configured relays
    Fingerprint(ConfigArgs),
    /// Routes one request through the engine and writes the body to stdout
    Fetch(FetchArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    config: ConfigArgs,
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header, `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] observability::MetricsError),
    #[error("could not create coordination store: {0}")]
    Store(#[from] StoreError),
    #[error("could not build routing engine: {0}")]
    Build(#[from] BuildError),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("request failed: {0}")]
    Route(#[from] RouteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::CheckConfig(args) => check_config(args),
        CliCommand::Fingerprint(args) => fingerprint(args),
        CliCommand::Fetch(args) => fetch(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load(args: &ConfigArgs) -> Result<Config, ConfigError> {
    let config = Config::from_file(&args.config)?;
    config.validate()?;
    Ok(config)
}

fn check_config(args: &ConfigArgs) -> Result<(), CliError> {
    let config = load(args)?;
    let relays = config.engine.load_relays().map_err(ConfigError::from)?;
    let fallback = config
        .engine
        .fallback
        .as_ref()
        .is_some_and(|f| f.is_enabled());

    println!(
        "config ok: {} relays, {} endpoint patterns, fallback {}",
        relays.len(),
        config.engine.endpoints.len(),
        if fallback { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn fingerprint(args: &ConfigArgs) -> Result<(), CliError> {
    let config = load(args)?;
    let relays = config.engine.load_relays().map_err(ConfigError::from)?;
    let pool = RelayPool::try_new(relays)
        .map_err(|e| ConfigError::from(engine::ValidationError::from(e)))?;

    println!("{}", pool.fingerprint());
    for relay in pool.iter() {
        println!("  #{} {}", relay.index(), relay);
    }
    Ok(())
}

fn fetch(args: &FetchArgs) -> Result<(), CliError> {
    let config = load(&args.config)?;
    let _sentry = observability::init_logging(config.logging.as_ref());
    if let Some(metrics) = &config.metrics {
        observability::init_metrics(metrics)?;
    }

    let request = build_request(args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let clock = Arc::new(SystemClock);
        let store = coordinator::get_store(&config.store, clock.clone())?;
        let engine = RoutingEngine::new(&config.engine, store, clock)?;

        let result = engine.execute(request).await;
        engine.cleanup();
        let response = result?;

        eprintln!("{:?} {}", response.version(), response.status());
        for (name, value) in response.headers() {
            eprintln!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
        std::io::stdout().write_all(response.body())?;
        Ok::<(), CliError>(())
    })
}

fn build_request(args: &FetchArgs) -> Result<Request<Bytes>, CliError> {
    let method = Method::from_bytes(args.method.as_bytes())
        .map_err(|_| CliError::InvalidArgument(format!("invalid method {}", args.method)))?;

    let mut builder = Request::builder().method(method).uri(args.url.as_str());
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        builder = builder.header(name, value);
    }

    let body = args.data.clone().map(Bytes::from).unwrap_or_default();
    builder
        .body(body)
        .map_err(|e| CliError::InvalidArgument(format!("invalid request: {e}")))
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), CliError> {
    let invalid = || CliError::InvalidArgument(format!("invalid header {raw:?}"));

    let (name, value) = raw.split_once(':').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let (name, value) = parse_header("X-Custom:  some value ").unwrap();
        assert_eq!(name, "x-custom");
        assert_eq!(value, "some value");

        assert!(parse_header("no separator").is_err());
        assert!(parse_header("bad name: value").is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = CliCommand::try_parse_from([
            "relay-router",
            "fetch",
            "-c",
            "config.yaml",
            "-X",
            "POST",
            "-H",
            "accept: application/json",
            "-H",
            "x-custom: 1",
            "-d",
            "{}",
            "https://users.roblox.com/v1/users/1",
        ])
        .unwrap();

        let CliCommand::Fetch(args) = cli else {
            panic!("expected fetch");
        };
        assert_eq!(args.config.config, PathBuf::from("config.yaml"));
        assert_eq!(args.headers.len(), 2);

        let request = build_request(&args).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().host(), Some("users.roblox.com"));
        assert_eq!(request.headers()["x-custom"], "1");
        assert_eq!(request.body().as_ref(), b"{}");

        assert!(CliCommand::try_parse_from(["relay-router", "check-config"]).is_err());
    }
}
