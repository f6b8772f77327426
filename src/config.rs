use crate::server::services::session_services::ContentKind;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // upstream stream URL to relay when running standalone
    #[clap(long, env)]
    pub stream_url: String,

    // how the stream should be relayed: movie and series are direct byte
    // relays, live goes through playlist rewriting
    #[clap(long, env, value_enum, default_value = "live")]
    pub stream_kind: ContentKind,

    // per-request upstream timeout, applies to every redirect hop on its own
    #[clap(long, env, default_value = "30")]
    pub upstream_timeout_secs: u64,

    // redirect hops before the relay gives up
    #[clap(long, env, default_value = "5")]
    pub max_redirects: usize,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            stream_url: String::new(),
            stream_kind: ContentKind::Live,
            upstream_timeout_secs: 30,
            max_redirects: 5,
            sentry_dsn: None,
        }
    }
}
