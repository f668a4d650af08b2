use actix_web::{
    post,
    web::{self, Data, Json, Path},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sign_proxy_base_hsm::SlotId;
use sign_proxy_broker::{SignRequest, SignResponse, WorkerContext};
use tracing::info;

use crate::{error::ServerError, result::SResult};

/// The answer to a signature request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedData {
    /// the slot which signed
    pub slot: SlotId,
    /// base64 encoded signature
    pub signed: String,
    /// PEM certificate of the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
}

impl From<SignResponse> for SignedData {
    fn from(response: SignResponse) -> Self {
        Self {
            slot: response.slot,
            signed: STANDARD.encode(response.signature),
            cert: response.certificate,
        }
    }
}

/// Read `{"mech": "...", "data": "<base64>"}`; `mech` is optional
fn parse_request(label: &str, key_name: &str, body: &Value) -> SResult<SignRequest> {
    let Value::Object(message) = body else {
        return Err(ServerError::InvalidRequest(
            "the request must be a JSON object".to_owned(),
        ));
    };
    let data = match message.get("data") {
        Some(Value::String(data)) => STANDARD.decode(data).map_err(|e| {
            ServerError::InvalidRequest(format!("'data' is not valid base64: {e}"))
        })?,
        Some(_) => {
            return Err(ServerError::InvalidRequest(
                "'data' must be a base64 string".to_owned(),
            ));
        }
        None => {
            return Err(ServerError::InvalidRequest(
                "missing 'data' in request".to_owned(),
            ));
        }
    };
    let request = SignRequest::new(label, key_name, data);
    match message.get("mech") {
        None | Some(Value::Null) => Ok(request),
        Some(Value::String(mechanism)) => Ok(request.with_mechanism(mechanism)),
        Some(_) => Err(ServerError::InvalidRequest(
            "'mech' must be a string".to_owned(),
        )),
    }
}

async fn signed(ctx: Data<WorkerContext>, request: SignRequest) -> SResult<Json<SignedData>> {
    let response = web::block(move || ctx.sign(&request)).await??;
    Ok(Json(response.into()))
}

/// Sign with a key which must have a certificate; the certificate is returned
#[post("/{label}/{key}/sign")]
pub(crate) async fn sign(
    path: Path<(String, String)>,
    body: Json<Value>,
    ctx: Data<WorkerContext>,
) -> SResult<Json<SignedData>> {
    let (label, key_name) = path.into_inner();
    info!("POST /{label}/{key_name}/sign");
    let request = parse_request(&label, &key_name, &body)?.require_certificate();
    signed(ctx, request).await
}

/// Sign without returning any certificate
#[post("/{label}/{key}/rawsign")]
pub(crate) async fn raw_sign(
    path: Path<(String, String)>,
    body: Json<Value>,
    ctx: Data<WorkerContext>,
) -> SResult<Json<SignedData>> {
    let (label, key_name) = path.into_inner();
    info!("POST /{label}/{key_name}/rawsign");
    let request = parse_request(&label, &key_name, &body)?;
    signed(ctx, request).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_request;
    use crate::error::ServerError;

    #[test]
    fn the_mechanism_defaults_to_rsa_pkcs1() {
        let request = parse_request("test", "key", &json!({"data": "dGVzdA=="})).unwrap();
        assert_eq!(request.mechanism, "RSAPKCS1");
        assert_eq!(request.data, b"test".to_vec());
        assert!(!request.include_cert);

        let request = parse_request(
            "test",
            "key",
            &json!({"mech": "SHA256RSAPKCS1", "data": "dGVzdA=="}),
        )
        .unwrap();
        assert_eq!(request.mechanism, "SHA256RSAPKCS1");
    }

    #[test]
    fn malformed_requests_are_rejected() {
        for body in [
            json!("foo"),
            json!([1, 2]),
            json!({"mech": "RSAPKCS1"}),
            json!({"data": 12}),
            json!({"data": "not base64!"}),
            json!({"mech": 3, "data": "dGVzdA=="}),
        ] {
            assert!(
                matches!(
                    parse_request("test", "key", &body),
                    Err(ServerError::InvalidRequest(_))
                ),
                "{body} should be rejected"
            );
        }
    }
}
