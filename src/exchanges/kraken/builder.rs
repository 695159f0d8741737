use crate::core::config::Credential;
use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::KrakenSigner;
use crate::core::kernel::{ReqwestRest, RestClientBuilder, RestClientConfig};
use crate::exchanges::kraken::connector::KrakenConnector;
use std::sync::Arc;

pub const USER_AGENT: &str = "KrakenRelay/0.1.0";

/// REST transport for `base_url`, signing private calls when the credential
/// is present
pub fn build_rest_client(
    base_url: String,
    credential: Option<Arc<Credential>>,
) -> Result<ReqwestRest, ExchangeError> {
    let rest_config = RestClientConfig::new(base_url, "kraken".to_string())
        .with_timeout(30)
        .with_user_agent(USER_AGENT.to_string());

    let mut rest_builder = RestClientBuilder::new(rest_config);

    if let Some(credential) = credential.filter(|c| c.has_credentials()) {
        rest_builder = rest_builder.with_signer(Arc::new(KrakenSigner::new(credential)));
    }

    rest_builder.build()
}

/// Create a Kraken connector for the REST passthrough routes
pub fn build_connector(
    base_url: String,
    credential: Option<Arc<Credential>>,
) -> Result<KrakenConnector<ReqwestRest>, ExchangeError> {
    Ok(KrakenConnector::new(build_rest_client(base_url, credential)?))
}
