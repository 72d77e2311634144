use std::{sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use conjur::{Client, ClientConfig};
use conjur_tokens::{
    sources::{iam::EnvironmentCredentials, jwt::FileJwtProvider},
    ApiKey, Login, ServiceId,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    ApiKey,
    Iam,
    Jwt,
}

#[derive(Debug, Parser)]
struct Opts {
    /// The Conjur appliance URL
    #[clap(long, env = "CONJUR_APPLIANCE_URL")]
    url: String,

    /// The Conjur account
    #[clap(long, env = "CONJUR_ACCOUNT")]
    account: String,

    /// How to authenticate
    #[clap(long, value_enum, default_value = "api-key")]
    method: Method,

    /// The login or host identity to authenticate as
    #[clap(long, env = "CONJUR_AUTHN_LOGIN")]
    login: Option<Login>,

    /// The API key of the login
    #[clap(long, env = "CONJUR_AUTHN_API_KEY", hide_env_values = true)]
    api_key: Option<ApiKey>,

    /// The authenticator instance for IAM, such as `authn-iam/prod`
    #[clap(long, env = "CONJUR_AUTHN_IAM", default_value = "authn-iam")]
    iam_authenticator: String,

    /// The service ID of the JWT authenticator
    #[clap(long, env = "CONJUR_AUTHN_JWT_SERVICE_ID")]
    service_id: Option<ServiceId>,

    /// The variable to fetch
    variable: String,

    /// Fetch the variable this many times, one second apart
    #[clap(long, default_value = "1")]
    repeat: u32,
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

    let config = ClientConfig::from_env()?;
    let mut client = Client::with_config(&opts.url, opts.account.as_str(), config)?;

    match opts.method {
        Method::ApiKey => {
            let login = opts
                .login
                .ok_or_else(|| color_eyre::eyre::eyre!("a login is required"))?;
            let api_key = opts
                .api_key
                .ok_or_else(|| color_eyre::eyre::eyre!("an API key is required"))?;
            client.set_credentials(&login, &api_key)?;
        }
        Method::Iam => {
            let login = opts
                .login
                .ok_or_else(|| color_eyre::eyre::eyre!("a host identity is required"))?;
            let authenticator = client.iam_authenticator(
                &opts.iam_authenticator,
                &login,
                Arc::new(EnvironmentCredentials),
            )?;
            client.set_authenticator(authenticator);
        }
        Method::Jwt => {
            let service_id = opts
                .service_id
                .ok_or_else(|| color_eyre::eyre::eyre!("a service ID is required"))?;
            let authenticator = client.jwt_authenticator(
                &service_id,
                opts.login.as_deref(),
                Arc::new(FileJwtProvider::default()),
            )?;
            client.set_authenticator(authenticator);
        }
    }

    let variable = client.variable(opts.variable);
    for i in 0..opts.repeat {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let value = variable.value_async().await?;
        tracing::info!(
            variable = variable.name(),
            len = value.len(),
            "fetched secret"
        );
    }

    Ok(())
}
