#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use actix_http::Request;
use actix_web::{
    App,
    body::MessageBody,
    dev::{Service, ServiceResponse},
    test,
    web::Data,
};
use sign_proxy_base_hsm::test_helpers::{SOFT_TOKEN_PATH, SoftToken};
use sign_proxy_broker::{Backoff, BrokerParams, WorkerContext};
use sign_proxy_logger::log_init;

use crate::routes;


/// A test application on the soft token, retrying without delay
pub(crate) async fn test_app(
    token: &SoftToken,
    max_retry: usize,
) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = actix_web::Error>
{
    log_init(option_env!("RUST_LOG"));
    let mut params = BrokerParams::new(SOFT_TOKEN_PATH);
    params.max_retry = max_retry;
    params.backoff = Backoff::none();
    test::init_service(
        App::new()
            .app_data(Data::new(WorkerContext::new(
                params,
                Arc::new(token.loader()),
            )))
            .configure(routes::configure),
    )
    .await
}
