//! Reconciliation between the freshly fetched schedule and the calendar's
//! auto-managed events.
//!
//! This module computes what is different between the two sides without
//! applying any changes. Every lesson identity lands in exactly one of
//! create / update / delete / unchanged.

use std::collections::HashMap;

use crate::gcal::GcalEvent;
use crate::lesson::EventProjection;

/// The operations one run must apply, as disjoint sets of lesson identities.
/// Both maps outlive the plan, so entries only carry the keys.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// In the schedule, not on the calendar
    pub to_create: Vec<String>,
    /// On both sides, but the calendar copy is out of date
    pub to_update: Vec<String>,
    /// On the calendar, no longer in the schedule
    pub to_delete: Vec<String>,
    /// On both sides and already identical; nothing is emitted for these
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Partition the identity universe into the four buckets.
///
/// An empty fresh schedule yields an empty plan rather than mass deletion: a
/// fetch that returns nothing is far more likely an upstream fault than a
/// deliberately cancelled term, and the caller is expected to have bailed
/// out before mutating anything.
pub fn reconcile(
    existing: &HashMap<String, GcalEvent>,
    fresh: &HashMap<String, EventProjection>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    if fresh.is_empty() {
        return plan;
    }

    for id in existing.keys() {
        if !fresh.contains_key(id) {
            plan.to_delete.push(id.clone());
        }
    }

    for (id, projection) in fresh {
        match existing.get(id) {
            None => plan.to_create.push(id.clone()),
            Some(event) if needs_update(event, projection) => plan.to_update.push(id.clone()),
            Some(_) => plan.unchanged += 1,
        }
    }

    plan
}

/// Field-by-field comparison of a calendar event against the fresh
/// projection. Times are compared as instants, not strings, so formatting
/// drift on the backend's side cannot cause churn; an absent color on both
/// sides compares equal, while a stale leftover color forces an update.
pub fn needs_update(existing: &GcalEvent, fresh: &EventProjection) -> bool {
    let existing_start = existing.start.as_ref().and_then(|t| t.date_time);
    let existing_end = existing.end.as_ref().and_then(|t| t.date_time);
    let existing_color = existing.color_id.as_deref().filter(|c| !c.is_empty());

    existing_start != Some(fresh.start)
        || existing_end != Some(fresh.end)
        || existing.summary != fresh.summary
        || existing.description != fresh.description
        || existing.location != fresh.location
        || existing_color != fresh.color_id.as_deref()
}
