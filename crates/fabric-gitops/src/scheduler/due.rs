use chrono::{DateTime, Duration, Utc};

use crate::model::Fabric;

/// When the fabric's next periodic sync is due. Counted from the later of
/// the last success and the last attempt, so a failing fabric is retried
/// once per interval instead of on every tick. `None` for a fabric that has
/// never been attempted: it is due right away.
pub fn due_at(fabric: &Fabric) -> Option<DateTime<Utc>> {
    let last = match (fabric.last_sync, fabric.last_sync_attempt) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    Some(last + Duration::seconds(fabric.sync_interval_secs as i64))
}

pub fn is_due(fabric: &Fabric, now: DateTime<Utc>) -> bool {
    fabric.sync_enabled && due_at(fabric).is_none_or(|due| due <= now)
}

/// The due subset of `fabrics`, most overdue first.
pub fn select_due(fabrics: Vec<Fabric>, now: DateTime<Utc>) -> Vec<Fabric> {
    let mut due: Vec<Fabric> = fabrics.into_iter().filter(|f| is_due(f, now)).collect();
    due.sort_by_key(due_at);
    due
}
