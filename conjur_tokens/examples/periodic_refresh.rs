use std::{sync::Arc, time::Duration};

use clap::Parser;
use conjur_tokens::{
    sources::ApiKeySource,
    transport::{ReqwestTransport, TransportOptions},
    Account, ApiKey, ApiKeyAuthenticator, CacheState, Login,
};
use reqwest::Url;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The Conjur appliance URL
    #[clap(long, env = "CONJUR_APPLIANCE_URL")]
    url: Url,

    /// The Conjur account
    #[clap(long, env = "CONJUR_ACCOUNT")]
    account: Account,

    /// The login or host identity to authenticate as
    #[clap(long, env = "CONJUR_AUTHN_LOGIN")]
    login: Login,

    /// The API key of the login
    #[clap(long, env = "CONJUR_AUTHN_API_KEY", hide_env_values = true)]
    api_key: ApiKey,

    /// How long a token is trusted, in seconds
    #[clap(long, default_value = "30")]
    validity: u64,

    /// How often the token is pulled, in seconds
    #[clap(long, default_value = "5")]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let transport = ReqwestTransport::with_options(TransportOptions::new(Duration::from_secs(30)))?;
    let authn_url = opts.url.join("authn")?;
    let source = ApiKeySource::new(
        Arc::new(transport),
        &authn_url,
        &opts.account,
        &opts.login,
        &opts.api_key,
    )?;
    let authenticator = ApiKeyAuthenticator::new(source, Duration::from_secs(opts.validity));

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let before = authenticator.state();
        let token = authenticator.token().await?;
        let remaining = authenticator.cache().remaining().map(|left| left.as_secs());

        match before {
            CacheState::Valid => {
                tracing::debug!(?remaining, len = token.as_str().len(), "pulled cached token")
            }
            CacheState::Empty | CacheState::Acquiring => {
                tracing::info!(?remaining, len = token.as_str().len(), "fetched new token")
            }
        }
    }
}
