//! TLS configuration with a self-signed fallback.

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use tokio::fs;
use tracing::info;

use crate::config::Args;

/// Builds the rustls config from the configured cert/key pair, or
/// generates an in-memory self-signed certificate when none is given.
pub async fn build_rustls_config(args: &Args, host: IpAddr) -> Result<RustlsConfig, std::io::Error> {
    if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        let cert = fs::read(cert).await?;
        let key = fs::read(key).await?;
        return RustlsConfig::from_pem(cert, key).await;
    }

    let generated = generate_simple_self_signed([host.to_string()])
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    info!("no TLS cert configured; using a self-signed certificate");
    RustlsConfig::from_pem(
        generated.cert.pem().into_bytes(),
        generated.key_pair.serialize_pem().into_bytes(),
    )
    .await
}
