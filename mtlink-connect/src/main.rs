//! mtlink-connect: start a session from a stored auth key and call
//! `help.getConfig`.
//!
//! The key must come from an earlier key exchange with the same data center.
//!
//! ```text
//! MTLINK_API_ID=12345 \
//! MTLINK_AUTH_KEY=<base64 of the 256-byte key> \
//! MTLINK_DC=2 MTLINK_ADDRESS=149.154.167.51 \
//!   cargo run -p mtlink-connect
//! ```
//!
//! Set `MTLINK_TEST=1` for test servers and `MTLINK_PROXY=socks5://host:port`
//! to tunnel through a proxy.

use std::env;
use std::error::Error;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mtlink_client::{AuthKey, Config, ProxyConfig, Session, TransportKind};
use mtlink_tl_types::functions::help::GetConfig;

type DynResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    // RUST_LOG=mtlink_client=debug for the full picture.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("mtlink_client=info,connect=info"))
        .init();

    if let Err(e) = run().await {
        eprintln!("\n✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> DynResult<()> {
    let config = config_from_env()?;
    let auth_key = auth_key_from_env()?;
    log::info!("Using {:?} on DC{} at {}:{}", auth_key, config.dc_id, config.address, config.port);

    let session = Session::new(config, auth_key)?;
    session.start().await?;

    let result = session.invoke(&GetConfig {}).await;
    session.stop().await;

    let blob = result?;
    println!("✅ help.getConfig answered with {} bytes", blob.0.len());
    Ok(())
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn config_from_env() -> DynResult<Config> {
    let mut config = Config::default();
    config.api_id = var("MTLINK_API_ID").ok_or("MTLINK_API_ID is not set")?.parse()?;
    if let Some(dc) = var("MTLINK_DC") {
        config.dc_id = dc.parse()?;
    }
    if let Some(address) = var("MTLINK_ADDRESS") {
        config.address = address;
    }
    if let Some(port) = var("MTLINK_PORT") {
        config.port = port.parse()?;
    }
    config.test_mode = var("MTLINK_TEST").is_some_and(|v| v != "0");
    if var("MTLINK_OBFUSCATED").is_some_and(|v| v != "0") {
        config.transport = TransportKind::Obfuscated { secret: None };
    }
    if let Some(proxy) = var("MTLINK_PROXY") {
        config.proxy = Some(parse_proxy(&proxy)?);
    }
    Ok(config)
}

/// `scheme://[user:pass@]host:port`
fn parse_proxy(url: &str) -> DynResult<ProxyConfig> {
    let (scheme, rest) = url.split_once("://").ok_or("proxy must look like scheme://host:port")?;
    let (auth, endpoint) = match rest.rsplit_once('@') {
        Some((auth, endpoint)) => (Some(auth), endpoint),
        None => (None, rest),
    };
    let (host, port) = endpoint.rsplit_once(':').ok_or("proxy port is missing")?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let proxy = ProxyConfig::new(scheme, host, port.parse()?);
    let proxy = match auth.and_then(|a| a.split_once(':')) {
        Some((user, pass)) => proxy.with_auth(user, pass),
        None => proxy,
    };
    proxy.scheme()?;
    Ok(proxy)
}

fn auth_key_from_env() -> DynResult<AuthKey> {
    let encoded = var("MTLINK_AUTH_KEY").ok_or("MTLINK_AUTH_KEY is not set")?;
    let raw = STANDARD.decode(encoded.trim())?;
    let data: [u8; 256] = raw
        .try_into()
        .map_err(|v: Vec<u8>| format!("auth key must be 256 bytes, got {}", v.len()))?;
    Ok(AuthKey::from_bytes(data))
}
