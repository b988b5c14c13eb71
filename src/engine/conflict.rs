use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    use crate::limits::*;
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.end < window.start {
        return Err(EngineError::LimitExceeded("window ends before it starts"));
    }
    Ok(())
}

pub(crate) fn validate_duration(duration: Ms) -> Result<(), EngineError> {
    if duration <= 0 || duration > crate::limits::MAX_SERVICE_DURATION_MS {
        return Err(EngineError::LimitExceeded("service duration out of range"));
    }
    Ok(())
}

// ── Overlap detector ─────────────────────────────────────────────

/// First active appointment of a participant colliding with `window`,
/// skipping `exclude`.
pub fn find_overlapping<'t>(
    timeline: &'t Timeline,
    window: &Window,
    exclude: Option<Ulid>,
) -> Option<&'t Slot> {
    timeline
        .colliding(window)
        .find(|slot| Some(slot.id) != exclude)
}

pub fn exists_overlapping(timeline: &Timeline, window: &Window, exclude: Option<Ulid>) -> bool {
    find_overlapping(timeline, window, exclude).is_some()
}

// ── Capacity tracker ─────────────────────────────────────────────

/// Active appointments of a workspace colliding with `window`, across all
/// services bound to it.
pub fn count_in_workspace(timeline: &Timeline, window: &Window, exclude: Option<Ulid>) -> usize {
    timeline
        .colliding(window)
        .filter(|slot| Some(slot.id) != exclude)
        .count()
}
