use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use sign_proxy_base_hsm::test_helpers::SoftToken;

use super::soft_context;
use crate::{BResult, BrokerError, SignRequest};

fn request(label: &str) -> SignRequest {
    SignRequest::new(label, "test", b"test".to_vec())
}

#[test]
fn load_is_spread_over_mirrored_slots_despite_failures() -> BResult<()> {
    let token = SoftToken::mirrored("mirror", 2);
    let rng = Mutex::new(StdRng::seed_from_u64(7));
    token.fail_sign(move |_| rng.lock().unwrap().random_bool(0.4));
    let ctx = soft_context(&token, 50);
    for _ in 0..99 {
        ctx.sign(&request("mirror"))?;
    }
    let stats = token.stats();
    assert_eq!(stats.total_signatures(), 99);
    assert!(stats.failed_signatures > 0);
    assert!(stats.signatures_on(0) > 30, "{stats:?}");
    assert!(stats.signatures_on(1) > 30, "{stats:?}");
    Ok(())
}

#[test]
fn healthy_slots_are_used_alternately() -> BResult<()> {
    let token = SoftToken::mirrored("mirror", 2);
    let ctx = soft_context(&token, 1);
    for _ in 0..10 {
        ctx.sign(&request("mirror"))?;
    }
    let stats = token.stats();
    assert_eq!(stats.signatures_on(0), 5);
    assert_eq!(stats.signatures_on(1), 5);
    assert_eq!(stats.opened_sessions, 2);
    Ok(())
}

#[test]
fn a_failing_session_is_replaced() -> BResult<()> {
    let token = SoftToken::test_token();
    let failures = AtomicUsize::new(1);
    token.fail_sign(move |_| {
        failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    });
    let ctx = soft_context(&token, 3);
    let response = ctx.sign(&request("test"))?;
    assert_eq!(response.slot, 0);

    let stats = token.stats();
    assert_eq!(stats.failed_signatures, 1);
    assert_eq!(stats.opened_sessions, 2);
    assert_eq!(stats.closed_sessions, 1);
    // the broken session took its cached key with it
    assert_eq!(stats.object_searches, 4);
    assert_eq!(token.live_sessions().get(&0), Some(&1));
    Ok(())
}

#[test]
fn a_reset_token_is_recovered_from() -> BResult<()> {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, 2);
    ctx.sign(&request("test"))?;
    token.drop_all_sessions();
    ctx.sign(&request("test"))?;
    assert_eq!(token.stats().opened_sessions, 2);
    Ok(())
}

#[test]
fn failing_session_opens_exhaust_the_retry_budget() {
    let token = SoftToken::test_token();
    token.fail_open_session(|_| true);
    let ctx = soft_context(&token, 5);
    let err = ctx.sign(&request("test")).unwrap_err();
    let BrokerError::RetryBudgetExhausted { attempts, last } = err else {
        panic!("the retry budget should be exhausted");
    };
    assert_eq!(attempts, 5);
    assert!(matches!(*last, BrokerError::SessionOpen { slot: Some(0), .. }));
    assert_eq!(token.stats().failed_opens, 5);
}

#[test]
fn failing_signatures_exhaust_the_retry_budget() {
    let token = SoftToken::mirrored("mirror", 2);
    token.fail_sign(|_| true);
    let ctx = soft_context(&token, 4);
    let err = ctx.sign(&request("mirror")).unwrap_err();
    assert!(matches!(
        err,
        BrokerError::RetryBudgetExhausted { attempts: 4, ref last } if matches!(**last, BrokerError::Signing { .. })
    ));
    assert_eq!(token.stats().failed_signatures, 4);
    assert!(token.live_sessions().values().all(|count| *count <= 1));
}

#[test]
fn a_dead_slot_is_avoided() -> BResult<()> {
    let token = SoftToken::mirrored("mirror", 2);
    token.fail_open_session(|slot| slot == 1);
    let ctx = soft_context(&token, 3);
    for _ in 0..10 {
        assert_eq!(ctx.sign(&request("mirror"))?.slot, 0);
    }
    assert_eq!(ctx.pool("mirror")?.size(), 1);

    // once slot 1 recovers and slot 0 fails, the refilled pool fails over to slot 1
    token.clear_faults();
    token.fail_sign(|slot| slot == 0);
    assert_eq!(ctx.sign(&request("mirror"))?.slot, 1);
    Ok(())
}

#[test]
fn concurrent_signatures_share_one_session_per_slot() -> BResult<()> {
    let token = SoftToken::mirrored("mirror", 2);
    let ctx = Arc::new(soft_context(&token, 3));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = ctx.clone();
            thread::spawn(move || -> BResult<()> {
                for _ in 0..25 {
                    ctx.sign(&request("mirror"))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }
    let stats = token.stats();
    assert_eq!(stats.total_signatures(), 100);
    assert_eq!(stats.opened_sessions, 2);
    assert_eq!(token.live_sessions().len(), 2);
    Ok(())
}

#[test]
fn labels_sharing_a_slot_share_its_session() -> BResult<()> {
    let token = SoftToken::test_token();
    let ctx = soft_context(&token, 3);
    ctx.sign(&request("test"))?;
    ctx.sign(&request("0"))?;
    assert_eq!(token.stats().opened_sessions, 1);
    assert_eq!(token.stats().object_searches, 2);
    Ok(())
}
