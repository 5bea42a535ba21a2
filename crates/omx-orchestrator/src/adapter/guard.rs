//! Safety rules the core enforces around the adapter, independent of which
//! transport is driving the panes.

use crate::error::AdapterError;

const MAX_TRIGGER_LEN: usize = 200;
const INJECTION_MARKER: &str = "[OMX_TMUX_INJECT]";

/// Reject a trigger message that is too long or carries the injection
/// marker. Called before any `send_keys_literal` that delivers a trigger.
pub fn validate_trigger(text: &str) -> Result<(), AdapterError> {
    if text.len() >= MAX_TRIGGER_LEN {
        return Err(AdapterError::TriggerRejected {
            reason: format!("trigger length {} exceeds limit {MAX_TRIGGER_LEN}", text.len()),
        });
    }
    if text.contains(INJECTION_MARKER) {
        return Err(AdapterError::TriggerRejected {
            reason: format!("trigger contains injection marker {INJECTION_MARKER}"),
        });
    }
    Ok(())
}

/// A pane the core must never kill or send a force-terminate to: the
/// leader's own pane and the HUD pane.
#[derive(Debug, Clone)]
pub struct ProtectedPanes {
    pub leader_pane_id: Option<String>,
    pub hud_pane_id: Option<String>,
}

impl ProtectedPanes {
    pub fn is_protected(&self, pane_id: &str) -> bool {
        self.leader_pane_id.as_deref() == Some(pane_id) || self.hud_pane_id.as_deref() == Some(pane_id)
    }

    /// Returns an error if `pane_id` is protected; callers must check this
    /// before any `kill_pane` call.
    pub fn guard_kill(&self, pane_id: &str) -> Result<(), AdapterError> {
        if self.is_protected(pane_id) {
            return Err(AdapterError::ProtectedPane {
                pane_id: pane_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_short_trigger() {
        assert!(validate_trigger("Read and follow the instructions in inbox.md").is_ok());
    }

    #[test]
    fn rejects_trigger_at_or_over_length_limit() {
        let text = "a".repeat(MAX_TRIGGER_LEN);
        assert!(validate_trigger(&text).is_err());
    }

    #[test]
    fn rejects_trigger_with_injection_marker() {
        let text = format!("hello {INJECTION_MARKER} world");
        assert!(validate_trigger(&text).is_err());
    }

    #[test]
    fn protected_panes_guard_leader_and_hud() {
        let guard = ProtectedPanes {
            leader_pane_id: Some("%0".to_string()),
            hud_pane_id: Some("%1".to_string()),
        };
        assert!(guard.guard_kill("%0").is_err());
        assert!(guard.guard_kill("%1").is_err());
        assert!(guard.guard_kill("%2").is_ok());
    }
}
