//! TLS certificate thumbprint of the management endpoint.

use std::time::Duration;

use reqwest::tls::TlsInfo;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// SHA-256 of the leaf certificate presented by `url`, as colon-separated
/// lowercase hex. The certificate is not verified; this is how the
/// fingerprint is pinned in the first place.
pub async fn fetch_sha256(url: &Url) -> Result<String> {
	let host = url.host_str().unwrap_or_default().to_string();
	let connection = |message: String| Error::Connection {
		target: host.clone(),
		message,
	};

	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.tls_info(true)
		.timeout(PROBE_TIMEOUT)
		.build()
		.map_err(|err| connection(err.to_string()))?;

	let response = client.head(url.clone()).send().await.map_err(|err| connection(err.to_string()))?;
	let certificate = response
		.extensions()
		.get::<TlsInfo>()
		.and_then(TlsInfo::peer_certificate)
		.ok_or_else(|| connection("endpoint presented no certificate".into()))?;

	let thumbprint = format_thumbprint(&Sha256::digest(certificate));
	debug!(target = "snapview.export", host = %host, %thumbprint, "fetched certificate thumbprint");
	Ok(thumbprint)
}

/// `ab:cd:...` rendering of a digest.
pub fn format_thumbprint(digest: &[u8]) -> String {
	digest.iter().map(|byte| format!("{byte:02x}")).collect::<Vec<_>>().join(":")
}
