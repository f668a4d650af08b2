//! Read-only reports on the module, its slots and the objects of a token.
//!
//! Reports are best effort: a field which cannot be read is reported inline as
//! `{"error": "..."}` instead of failing the whole report, and objects whose
//! attributes cannot be read are left out of the object listing.

use std::{collections::BTreeMap, fmt::Display};

use serde::Serialize;
use sign_proxy_base_hsm::{
    ATTRIBUTES_TO_DISPLAY, HError, LibraryInfo, SessionDetails, SlotId, SlotInfo, TokenInfo,
    TokenSession, attribute_name, mechanism_name, render_attribute,
};
use tracing::{debug, warn};

use crate::{BResult, BrokerError, context::WorkerContext, slot_resolver::resolve_label};

/// A value, or the reason it could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reported<T> {
    Value(T),
    Error { error: String },
}

impl<T> Reported<T> {
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Error { .. } => None,
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for Reported<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(e) => Self::Error {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub id: SlotId,
    pub mechanisms: Reported<Vec<String>>,
    pub slot: Reported<SlotInfo>,
    pub token: Reported<TokenInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotsReport {
    pub slots: Vec<SlotReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokensReport {
    /// every slot of the module
    pub slots: Vec<SlotId>,
    /// trimmed token label to the slots presenting it
    pub labels: BTreeMap<String, Vec<SlotId>>,
}

pub type ObjectAttributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct ObjectsReport {
    pub session: SessionDetails,
    pub objects: Vec<ObjectAttributes>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub library: String,
    pub info: Reported<LibraryInfo>,
}

/// Mechanisms, slot and token information of every slot presenting `label`
pub fn slots(ctx: &WorkerContext, label: &str) -> BResult<SlotsReport> {
    let driver = ctx.driver()?;
    let slots = resolve_label(label, driver.as_ref())?
        .into_iter()
        .map(|slot| SlotReport {
            id: slot,
            mechanisms: driver
                .mechanism_list(slot)
                .map(|mechanisms| mechanisms.into_iter().map(mechanism_name).collect())
                .into(),
            slot: driver.slot_info(slot).into(),
            token: driver.token_info(slot).into(),
        })
        .collect();
    Ok(SlotsReport { slots })
}

/// All the slots of the module, and the labels of the tokens they present
pub fn tokens(ctx: &WorkerContext) -> BResult<TokensReport> {
    let driver = ctx.driver()?;
    let slots = driver.slot_list()?;
    let mut labels: BTreeMap<String, Vec<SlotId>> = BTreeMap::new();
    for slot in &slots {
        match driver.token_info(*slot) {
            Ok(token) => labels
                .entry(token.label.trim().to_owned())
                .or_default()
                .push(*slot),
            Err(e) => warn!("no token information for slot {slot}: {e}"),
        }
    }
    Ok(TokensReport { slots, labels })
}

/// The session state and the displayable attributes of every object visible
/// on the first slot presenting `label`
pub fn objects(ctx: &WorkerContext, label: &str) -> BResult<ObjectsReport> {
    let driver = ctx.driver()?;
    let slot = resolve_label(label, driver.as_ref())?
        .first()
        .copied()
        .ok_or_else(|| BrokerError::NoSlotForLabel(label.to_owned()))?;
    let shared = ctx
        .sessions()
        .open(driver.as_ref(), slot, ctx.params().pin.as_deref())?;
    let report = {
        let info = shared
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on session".to_owned()))?;
        list_objects(info.session()?, slot)
    };
    if report.is_err() {
        // the session may be broken; the next user opens a fresh one
        ctx.sessions().discard(&shared)?;
    }
    report
}

fn list_objects(session: &dyn TokenSession, slot: SlotId) -> BResult<ObjectsReport> {
    let search_error = |e: HError| BrokerError::ObjectSearch {
        slot,
        reason: e.to_string(),
    };
    let details = session.session_info().map_err(search_error)?;
    let handles = session.find_objects(&[]).map_err(search_error)?;
    debug!("{} objects visible on slot {slot}", handles.len());
    let objects = handles
        .into_iter()
        .filter_map(|handle| {
            let values = session
                .get_attributes(handle, ATTRIBUTES_TO_DISPLAY)
                .inspect_err(|e| warn!("skipping object {handle} on slot {slot}: {e}"))
                .ok()?;
            Some(
                ATTRIBUTES_TO_DISPLAY
                    .iter()
                    .zip(values)
                    .filter_map(|(attribute, value)| {
                        value.map(|value| {
                            (
                                attribute_name(*attribute),
                                render_attribute(*attribute, &value),
                            )
                        })
                    })
                    .collect::<ObjectAttributes>(),
            )
        })
        .collect();
    Ok(ObjectsReport {
        session: details,
        objects,
    })
}

/// The configured module path and the module information, when the module loads
pub fn info(ctx: &WorkerContext) -> InfoReport {
    InfoReport {
        library: ctx.params().module_path.clone(),
        info: ctx
            .driver()
            .and_then(|driver| driver.library_info().map_err(BrokerError::from))
            .into(),
    }
}
