use std::sync::{Arc, mpsc};

use actix_web::{
    App, HttpServer,
    dev::{Server, ServerHandle},
    web::Data,
};
use sign_proxy_base_hsm::{DriverLoader, Pkcs11Loader};
use sign_proxy_broker::WorkerContext;
use tracing::{debug, info};

use crate::{
    config::ServerParams,
    result::{SResult, SResultHelper},
    routes,
};

/// Start the signing proxy on the native PKCS#11 module.
///
/// # Arguments
///
/// * `server_params` - the settings of the server and of its brokers
/// * `server_handle_transmitter` - an optional channel receiving the handle of the started server,
///   used to stop it
///
/// # Errors
///
/// This function returns an error if the server cannot be bound or fails while running.
pub async fn start_sign_proxy_server(
    server_params: ServerParams,
    server_handle_transmitter: Option<mpsc::Sender<ServerHandle>>,
) -> SResult<()> {
    info!("Signing proxy configuration: {server_params:#?}");
    let server = prepare_sign_proxy_server(&server_params, Arc::new(Pkcs11Loader))?;

    // send the server handle to the caller
    if let Some(tx) = &server_handle_transmitter {
        tx.send(server.handle())
            .context("start signing proxy: failed sending the server handle")?;
    }

    info!(
        "Starting the HTTP signing proxy on {}:{}...",
        server_params.hostname, server_params.port
    );
    server.await.map_err(Into::into)
}

/// Prepare the HTTP server.
///
/// Every worker builds its own [`WorkerContext`]: modules, sessions and pools are never
/// shared between workers.
///
/// # Errors
///
/// Fails when the address cannot be bound.
pub fn prepare_sign_proxy_server(
    server_params: &ServerParams,
    loader: Arc<dyn DriverLoader>,
) -> SResult<Server> {
    let address = format!("{}:{}", server_params.hostname, server_params.port);
    let broker_params = server_params.broker.clone();

    let mut server = HttpServer::new(move || {
        debug!("starting a worker on {}", broker_params.module_path);
        App::new()
            .app_data(Data::new(WorkerContext::new(
                broker_params.clone(),
                loader.clone(),
            )))
            .configure(routes::configure)
    });
    if let Some(workers) = server_params.workers {
        server = server.workers(workers);
    }
    Ok(server.bind(address)?.run())
}
