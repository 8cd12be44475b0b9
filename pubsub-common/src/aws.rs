use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sqs::config::Credentials;
use envconfig::Envconfig;
use tracing::info;

/// Region and credentials shared by the queue and topic clients.
#[derive(Envconfig, Clone, Debug, Default)]
pub struct AwsConfig {
    #[envconfig(from = "AWS_REGION")]
    pub region: Option<String>,

    /// When set, `secret_key` is used alongside it. Otherwise credentials are read from the environment.
    #[envconfig(from = "AWS_ACCESS_KEY")]
    pub access_key: Option<String>,

    #[envconfig(from = "AWS_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Override the service endpoint, e.g. to point at a local emulator.
    #[envconfig(from = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref().filter(|region| !region.is_empty())
    }

    fn static_credentials(&self) -> Option<Credentials> {
        match self.access_key.as_deref() {
            Some(access_key) if !access_key.is_empty() => Some(Credentials::new(
                access_key,
                self.secret_key.clone().unwrap_or_default(),
                None,
                None,
                "pubsub-static",
            )),
            _ => None,
        }
    }
}

/// Build an `SdkConfig` from an `AwsConfig`.
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    let mut builder = aws_config::defaults(BehaviorVersion::latest());

    builder = match config.static_credentials() {
        Some(credentials) => builder.credentials_provider(credentials),
        None => builder.credentials_provider(EnvironmentVariableCredentialsProvider::new()),
    };

    if let Some(region) = config.region() {
        builder = builder.region(Region::new(region.to_owned()));
    }

    if let Some(endpoint) = &config.endpoint_url {
        info!("using aws endpoint override {}", endpoint);
        builder = builder.endpoint_url(endpoint);
    }

    builder.load().await
}
