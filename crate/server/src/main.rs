use dotenvy::dotenv;
use sign_proxy_logger::tracing_init;
use sign_proxy_server::{
    config::{ClapConfig, ServerParams},
    result::SResult,
    start_sign_proxy_server::start_sign_proxy_server,
};
use tracing::{debug, info};

/// The main entrypoint of the program.
///
/// Loads the `.env` file, reads the configuration from the file named by `SIGN_PROXY_CONF`
/// or from the command line, initializes the logs and starts the server.
#[tokio::main]
async fn main() -> SResult<()> {
    if std::env::var("RUST_BACKTRACE").is_err() {
        unsafe {
            std::env::set_var("RUST_BACKTRACE", "full");
        }
    }

    // Load variable from a .env file
    dotenv().ok();

    let clap_config = ClapConfig::load_from_file()?;

    tracing_init(
        clap_config.logging.rust_log.as_deref(),
        clap_config.logging.quiet,
    );

    info!("sign_proxy {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Configuration: {clap_config:#?}");

    let server_params = ServerParams::try_from(clap_config)?;
    start_sign_proxy_server(server_params, None).await
}
