//! One full reconciliation pass: fetch, list, diff, apply.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

use crate::auth;
use crate::config::Config;
use crate::gcal::{self, GcalClient, GcalEvent};
use crate::lesson::{self, EventProjection, ScheduleDay, DATE_FMT};
use crate::reconcile::{reconcile, ReconcilePlan};
use crate::timetable::TimetableClient;

/// Run one synchronization pass against the target calendar.
pub async fn update_schedule(cfg: &Config) -> Result<()> {
    let token = auth::access_token().await?;
    let gcal = GcalClient::new(token, cfg.target_calendar_id.clone());

    println!("📥 Fetching the timetable from the university server...");
    let schedule = TimetableClient::new()
        .fetch_schedule(cfg.group_id, None, &cfg.stop_words)
        .await?;

    // An empty fetch is almost certainly an upstream fault, not a cancelled
    // term; bail out before touching the calendar.
    let Some(first_day) = schedule.first() else {
        println!("ℹ️ The fetched timetable is empty — leaving the calendar untouched.");
        return Ok(());
    };

    println!(
        "🔍 Listing calendar events from {} on...",
        first_day.date.format(DATE_FMT)
    );
    let existing = gcal
        .list_events(lesson::start_of_day(first_day.date))
        .await
        .context("Failed to list existing events")?;
    let existing_map = build_existing_map(existing);
    println!(
        "🗓 Found {} auto-managed events in the calendar.",
        existing_map.len()
    );

    let fresh_map = build_projection_map(&schedule, &cfg.colors);
    println!("📚 The timetable currently has {} lessons.", fresh_map.len());

    let plan = reconcile(&existing_map, &fresh_map);
    apply_plan(&gcal, &plan, &existing_map, &fresh_map, cfg.request_pause).await;

    Ok(())
}

/// Index listed events by lesson identity, dropping everything that is not
/// auto-managed. Duplicates should not happen; when they do, the later event
/// wins and the earlier one is reported rather than silently papered over.
fn build_existing_map(events: Vec<GcalEvent>) -> HashMap<String, GcalEvent> {
    let mut map: HashMap<String, GcalEvent> = HashMap::new();

    for event in events {
        let Some(id) = gcal::lesson_id_from_event(&event) else {
            continue;
        };
        if let Some(previous) = map.insert(id.clone(), event) {
            eprintln!(
                "⚠️ Calendar has two events for lesson {id:?} (kept {}, shadowed {})",
                map[&id].id, previous.id
            );
        }
    }

    map
}

/// Project every fetched lesson, keyed by identity. A lesson that fails to
/// project is logged and skipped, like a malformed record at fetch time.
fn build_projection_map(
    schedule: &[ScheduleDay],
    colors: &HashMap<String, String>,
) -> HashMap<String, EventProjection> {
    let mut map = HashMap::new();

    for day in schedule {
        for item in &day.lessons {
            match lesson::project(day.date, item, colors) {
                Ok(projection) => {
                    map.insert(projection.lesson_id.clone(), projection);
                }
                Err(e) => eprintln!("⚠️ Skipping lesson that does not project: {e:#}"),
            }
        }
    }

    map
}

/// Execute the plan sequentially: deletes, then creates, then patches.
///
/// Each operation is isolated — a failure is logged with the lesson identity
/// and summary, and the rest of the plan still runs; the next scheduled pass
/// retries naturally. Every mutation is followed by the configured pause so
/// the backend's shared per-minute quota is respected.
async fn apply_plan(
    gcal: &GcalClient,
    plan: &ReconcilePlan,
    existing: &HashMap<String, GcalEvent>,
    fresh: &HashMap<String, EventProjection>,
    pause: Duration,
) {
    for id in &plan.to_delete {
        let Some(event) = existing.get(id) else {
            continue;
        };
        match gcal.delete_event(&event.id).await {
            Ok(()) => println!("🗑 Deleted stale event: {} ({id})", event.summary),
            Err(e) => eprintln!("⚠️ Failed to delete '{}' ({id}): {e:#}", event.summary),
        }
        tokio::time::sleep(pause).await;
    }

    for id in &plan.to_create {
        let Some(projection) = fresh.get(id) else {
            continue;
        };
        match gcal.insert_event(&gcal::to_event(projection)).await {
            Ok(created) => println!("✅ Created event: {}", created.summary),
            Err(e) => eprintln!("⚠️ Failed to create '{}' ({id}): {e:#}", projection.summary),
        }
        tokio::time::sleep(pause).await;
    }

    for id in &plan.to_update {
        let (Some(event), Some(projection)) = (existing.get(id), fresh.get(id)) else {
            continue;
        };
        match gcal.patch_event(&event.id, &gcal::to_event(projection)).await {
            Ok(updated) => println!("♻️ Updated event: {}", updated.summary),
            Err(e) => eprintln!("⚠️ Failed to update '{}' ({id}): {e:#}", projection.summary),
        }
        tokio::time::sleep(pause).await;
    }

    if plan.unchanged > 0 {
        println!("⏭ {} events already up to date.", plan.unchanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::AUTO_TAG;
    use crate::timetable::build_days;
    use serde_json::json;

    fn colors() -> HashMap<String, String> {
        HashMap::from([("Лек".to_string(), "11".to_string())])
    }

    fn managed_event(event_id: &str, lesson_id: &str) -> GcalEvent {
        serde_json::from_value(json!({
            "id": event_id,
            "summary": "Math (Лек)",
            "description": format!("{lesson_id} {AUTO_TAG}"),
            "extendedProperties": {"private": {"lesson_id": lesson_id}}
        }))
        .unwrap()
    }

    #[test]
    fn test_existing_map_excludes_foreign_events() {
        let foreign: GcalEvent = serde_json::from_value(json!({
            "id": "dentist",
            "summary": "Dentist",
            "description": "bring the referral"
        }))
        .unwrap();

        let map = build_existing_map(vec![managed_event("evt-1", "lesson-a"), foreign]);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("lesson-a"));
    }

    #[test]
    fn test_existing_map_keeps_last_duplicate() {
        let map = build_existing_map(vec![
            managed_event("evt-1", "lesson-a"),
            managed_event("evt-2", "lesson-a"),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map["lesson-a"].id, "evt-2");
    }

    #[test]
    fn test_first_sync_plans_one_create_per_lesson() {
        // The end-to-end shape of a first run: one fetched lesson, an empty
        // calendar, and a plan with exactly one insert carrying the tag.
        let schedule = build_days(
            vec![json!({
                "dateIn": "2025-09-01",
                "dayNumber": 1,
                "lessonNumber": 1,
                "timeIn": "09:00",
                "timeOut": "10:30",
                "discipline": "Math",
                "disciplineType": "Лек",
                "teacherF": "Petrov",
                "teacherN": "Pavel",
                "teacherO": "Petrovich",
                "classroom": "ка305",
                "day": "Понедельник",
            })],
            &[],
        );

        let fresh_map = build_projection_map(&schedule, &colors());
        assert_eq!(fresh_map.len(), 1);

        let plan = reconcile(&HashMap::new(), &fresh_map);
        assert_eq!(plan.to_create.len(), 1);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_delete.is_empty());

        let id = &plan.to_create[0];
        assert_eq!(id, "01.09.2025|09:00–10:30|Petrov P.P.|305");

        let body = gcal::to_event(&fresh_map[id]);
        assert_eq!(body.description, format!("{id} {AUTO_TAG}"));
        assert_eq!(body.color_id.as_deref(), Some("11"));
    }

    #[test]
    fn test_projection_map_counts_all_lessons_across_days() {
        let mut base = json!({
            "dateIn": "2025-09-01",
            "dayNumber": 1,
            "lessonNumber": 1,
            "timeIn": "09:00",
            "timeOut": "10:30",
            "discipline": "Math",
            "disciplineType": "Лек",
            "teacherF": "Petrov",
            "classroom": "ка305",
            "day": "Понедельник",
        });
        let mut second = base.clone();
        second["dayNumber"] = json!(2);
        let mut third = base.clone();
        third["lessonNumber"] = json!(2);
        third["timeIn"] = json!("10:45");
        third["timeOut"] = json!("12:15");
        base["discipline"] = json!("Physics");

        let schedule = build_days(vec![base, second, third], &[]);
        let map = build_projection_map(&schedule, &colors());
        assert_eq!(map.len(), 3);
    }
}
