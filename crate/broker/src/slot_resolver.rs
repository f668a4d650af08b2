use sign_proxy_base_hsm::{SlotId, TokenDriver};
use tracing::{debug, warn};

use crate::BResult;

/// The slots presenting `label`, in enumeration order.
///
/// A numeric label designates that slot directly and the driver is not queried.
/// Otherwise the label is matched exactly against the trimmed token labels;
/// slots whose token cannot be read are skipped. The result may be empty.
pub fn resolve_label(label: &str, driver: &dyn TokenDriver) -> BResult<Vec<SlotId>> {
    if let Ok(slot) = label.parse::<SlotId>() {
        return Ok(vec![slot]);
    }
    let mut slots = Vec::new();
    for slot in driver.slot_list()? {
        match driver.token_info(slot) {
            Ok(token) if token.label.trim() == label => slots.push(slot),
            Ok(_) => {}
            Err(e) => warn!("skipping slot {slot}: {e}"),
        }
    }
    debug!("label {label} resolved to slots {slots:?}");
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use sign_proxy_base_hsm::test_helpers::{SoftSlot, SoftToken};

    use super::resolve_label;
    use crate::BResult;

    fn token() -> SoftToken {
        SoftToken::new(vec![
            SoftSlot::new(0, "mirror"),
            SoftSlot::new(1, "other"),
            SoftSlot::new(2, "mirror").without_token(),
            SoftSlot::new(7, "mirror"),
            SoftSlot::new(9, "mirror2"),
        ])
    }

    #[test]
    fn numeric_labels_designate_a_slot() -> BResult<()> {
        let token = token();
        assert_eq!(resolve_label("1", &token)?, vec![1]);
        // even one the driver does not know about
        assert_eq!(resolve_label("42", &token)?, vec![42]);
        Ok(())
    }

    #[test]
    fn labels_match_trimmed_token_labels_exactly() -> BResult<()> {
        let token = token();
        assert_eq!(resolve_label("mirror", &token)?, vec![0, 7]);
        assert_eq!(resolve_label("other", &token)?, vec![1]);
        assert!(resolve_label("mirr", &token)?.is_empty());
        assert!(resolve_label("unknown", &token)?.is_empty());
        Ok(())
    }
}
