use actix_web::{
    HttpResponse, HttpResponseBuilder, get,
    http::{StatusCode, header},
    web::{self, Data, Json, Path, ServiceConfig},
};
use sign_proxy_broker::{
    BrokerError, WorkerContext,
    introspection::{self, InfoReport, ObjectsReport, SlotsReport, TokensReport},
};
use tracing::{error, info, warn};

use crate::{error::ServerError, result::SResult};

pub mod sign;

impl actix_web::error::ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            Self::Broker(e) => match e {
                BrokerError::KeyNotFound(_) | BrokerError::NoSlotForLabel(_) => {
                    StatusCode::NOT_FOUND
                }
                BrokerError::CertificateRequired(_) => StatusCode::UNPROCESSABLE_ENTITY,
                BrokerError::UnknownMechanism(_) => StatusCode::BAD_REQUEST,
                BrokerError::RetryBudgetExhausted { .. }
                | BrokerError::SessionOpen { .. }
                | BrokerError::ObjectSearch { .. }
                | BrokerError::Signing { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BrokerError::DriverLoad { .. } | BrokerError::Driver(_) | BrokerError::Default(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },

            Self::ConfigurationError(_) | Self::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let message = self.to_string();

        if status_code >= StatusCode::INTERNAL_SERVER_ERROR {
            error!("{status_code} - {message}");
        } else {
            warn!("{status_code} - {message}");
        }

        HttpResponseBuilder::new(status_code)
            .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
            .body(message)
    }
}

/// Register the routes of the signing proxy.
///
/// `/info` must come before `/{label}`, which would match it otherwise.
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(get_info)
        .service(get_tokens)
        .service(sign::sign)
        .service(sign::raw_sign)
        .service(get_objects)
        .service(get_slots);
}

/// The configured module and what it says about itself
#[get("/info")]
pub(crate) async fn get_info(ctx: Data<WorkerContext>) -> SResult<Json<InfoReport>> {
    info!("GET /info");
    Ok(Json(web::block(move || introspection::info(&ctx)).await?))
}

/// Every slot of the module and the slots of each token label
#[get("/")]
pub(crate) async fn get_tokens(ctx: Data<WorkerContext>) -> SResult<Json<TokensReport>> {
    info!("GET /");
    Ok(Json(
        web::block(move || introspection::tokens(&ctx)).await??,
    ))
}

/// Mechanisms, slot and token information of the slots presenting a label
#[get("/{label}")]
pub(crate) async fn get_slots(
    label: Path<String>,
    ctx: Data<WorkerContext>,
) -> SResult<Json<SlotsReport>> {
    let label = label.into_inner();
    info!("GET /{label}");
    Ok(Json(
        web::block(move || introspection::slots(&ctx, &label)).await??,
    ))
}

/// The objects of the first slot presenting a label
#[get("/{label}/objects")]
pub(crate) async fn get_objects(
    label: Path<String>,
    ctx: Data<WorkerContext>,
) -> SResult<Json<ObjectsReport>> {
    let label = label.into_inner();
    info!("GET /{label}/objects");
    Ok(Json(
        web::block(move || introspection::objects(&ctx, &label)).await??,
    ))
}
