use std::sync::Arc;

use sign_proxy_base_hsm::test_helpers::{
    SOFT_TOKEN_PATH, SoftSlot, SoftToken, TEST_CERTIFICATE_DER,
};

use super::soft_context;
use crate::{
    BResult, Backoff, BrokerError, BrokerParams, DEFAULT_MAX_RETRY, SignRequest, WorkerContext,
};

#[test]
fn sign_with_certificate() -> BResult<()> {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let request = SignRequest::new("test", "test", b"test".to_vec())
        .with_mechanism("RSAPKCS1")
        .require_certificate();
    let response = ctx.sign(&request)?;
    assert_eq!(response.slot, 0);
    assert_eq!(response.signature, b"RSAPKCS1/0/test/test".to_vec());
    let certificate = response.certificate.unwrap();
    assert!(certificate.starts_with("-----BEGIN CERTIFICATE-----"));
    assert_eq!(
        pem::parse(certificate).unwrap().contents(),
        TEST_CERTIFICATE_DER
    );
    Ok(())
}

#[test]
fn raw_sign_never_returns_the_certificate() -> BResult<()> {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let response = ctx.sign(&SignRequest::new("test", "test", b"test".to_vec()))?;
    assert!(!response.signature.is_empty());
    assert_eq!(response.certificate, None);

    // the key cache of the session does not change the answer of a later request
    let response = ctx.sign(
        &SignRequest::new("test", "test", b"test".to_vec()).require_certificate(),
    )?;
    assert!(response.certificate.is_some());
    // the raw signature already searched the key and its certificate
    assert_eq!(token.stats().object_searches, 2);
    Ok(())
}

#[test]
fn slots_can_be_addressed_by_id() -> BResult<()> {
    let token = SoftToken::new(vec![
        SoftSlot::new(0, "a").with_key("k", b"\x01"),
        SoftSlot::new(4, "b").with_key("k", b"\x01"),
    ]);
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let response = ctx.sign(
        &SignRequest::new("4", "k", b"data".to_vec()).with_mechanism("SHA256RSAPKCS1"),
    )?;
    assert_eq!(response.slot, 4);
    assert_eq!(response.signature, b"SHA256RSAPKCS1/4/k/data".to_vec());
    Ok(())
}

#[test]
fn keys_are_looked_up_once_per_session() -> BResult<()> {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let request = SignRequest::new("test", "test", b"test".to_vec()).require_certificate();
    let first = ctx.sign(&request)?;
    // key and certificate
    assert_eq!(token.stats().object_searches, 2);
    let second = ctx.sign(&request)?;
    assert_eq!(token.stats().object_searches, 2);
    assert_eq!(first, second);
    assert_eq!(token.stats().opened_sessions, 1);
    Ok(())
}

#[test]
fn a_missing_key_fails_after_a_single_attempt() {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let err = ctx
        .sign(&SignRequest::new("test", "missing", b"test".to_vec()))
        .unwrap_err();
    assert!(matches!(err, BrokerError::KeyNotFound(ref key) if key == "missing"));
    let stats = token.stats();
    assert_eq!(stats.opened_sessions, 1);
    assert_eq!(stats.object_searches, 1);
    assert_eq!(stats.total_signatures(), 0);
}

#[test]
fn a_required_certificate_must_exist() -> BResult<()> {
    let token = SoftToken::new(vec![SoftSlot::new(0, "test").with_key("nocert", b"\x02")]);
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let err = ctx
        .sign(&SignRequest::new("test", "nocert", b"test".to_vec()).require_certificate())
        .unwrap_err();
    assert!(matches!(err, BrokerError::CertificateRequired(_)));
    assert_eq!(token.stats().opened_sessions, 1);
    assert_eq!(token.stats().total_signatures(), 0);

    let response = ctx.sign(&SignRequest::new("test", "nocert", b"test".to_vec()))?;
    assert_eq!(response.certificate, None);
    Ok(())
}

#[test]
fn unknown_mechanisms_are_refused_before_any_hardware_access() {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let err = ctx
        .sign(&SignRequest::new("test", "test", b"test".to_vec()).with_mechanism("RSAPSS"))
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownMechanism(ref m) if m == "RSAPSS"));
    assert_eq!(token.stats().loads, 0);
}

#[test]
fn unknown_labels_are_refused() {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, DEFAULT_MAX_RETRY);
    let err = ctx
        .sign(&SignRequest::new("nope", "test", b"test".to_vec()))
        .unwrap_err();
    assert!(matches!(err, BrokerError::NoSlotForLabel(_)));
    assert!(!err.is_retryable());
}

#[test]
fn pins_are_checked_on_login() -> BResult<()> {
    let token = SoftToken::test_token().with_pin("1234");
    let mut params = BrokerParams::new(SOFT_TOKEN_PATH);
    params.pin = Some("0000".to_owned());
    params.max_retry = 2;
    params.backoff = Backoff::none();
    let ctx = WorkerContext::new(params.clone(), Arc::new(token.loader()));
    let err = ctx
        .sign(&SignRequest::new("test", "test", b"test".to_vec()))
        .unwrap_err();
    // a wrong pin fails the session open, which is retried
    assert!(matches!(
        err,
        BrokerError::RetryBudgetExhausted { attempts: 2, .. }
    ));
    assert_eq!(token.stats().logins, 0);
    assert!(token.live_sessions().is_empty());

    params.pin = Some("1234".to_owned());
    let ctx = WorkerContext::new(params, Arc::new(token.loader()));
    ctx.sign(&SignRequest::new("test", "test", b"test".to_vec()))?;
    ctx.sign(&SignRequest::new("test", "test", b"test".to_vec()))?;
    assert_eq!(token.stats().logins, 1);
    Ok(())
}
