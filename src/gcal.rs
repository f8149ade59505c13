//! Google Calendar v3 REST client and event wire types.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lesson::{EventProjection, AUTO_TAG, CALENDAR_TIME_ZONE};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Events per list page; pages are followed to exhaustion regardless
const PAGE_SIZE: u32 = 2500;

/// Key of the structured identity property on auto-managed events
const PRIVATE_ID_KEY: &str = "lesson_id";

/// A calendar event as the API serves and accepts it. Only the fields this
/// syncer reads or writes are modeled; the API ignores what we omit and we
/// ignore what it adds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcalEvent {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub summary: String,
    pub description: String,
    pub location: String,
    /// Serialized even when None: a patch must clear a color the fresh
    /// projection no longer carries, and an omitted field would keep it.
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<ExtendedProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDateTime {
    /// Set for all-day events instead of dateTime
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub time_zone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedProperties {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reminders {
    pub use_default: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventsPage {
    items: Vec<GcalEvent>,
    next_page_token: Option<String>,
}

/// Authenticated handle to one target calendar.
pub struct GcalClient {
    http: reqwest::Client,
    token: String,
    calendar_id: String,
}

impl GcalClient {
    pub fn new(token: String, calendar_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            calendar_id,
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{API_BASE}/calendars/{}/events",
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// List every non-cancelled event starting at or after `time_min`,
    /// following pages to exhaustion so a long term cannot be silently
    /// truncated. Recurring events come pre-expanded into single occurrences.
    pub async fn list_events(&self, time_min: DateTime<FixedOffset>) -> Result<Vec<GcalEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin".to_string(), time_min.to_rfc3339()),
                ("singleEvents".to_string(), "true".to_string()),
                ("orderBy".to_string(), "startTime".to_string()),
                ("maxResults".to_string(), PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken".to_string(), token.clone()));
            }

            let page: EventsPage = self
                .http
                .get(self.events_url())
                .query(&query)
                .bearer_auth(&self.token)
                .send()
                .await
                .context("Event list request failed")?
                .error_for_status()
                .context("Event list returned an error status")?
                .json()
                .await
                .context("Failed to decode event list")?;

            events.extend(page.items.into_iter().filter(|e| e.status != "cancelled"));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }

    pub async fn insert_event(&self, event: &GcalEvent) -> Result<GcalEvent> {
        let created = self
            .http
            .post(self.events_url())
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .context("Event insert request failed")?
            .error_for_status()
            .context("Event insert returned an error status")?
            .json()
            .await
            .context("Failed to decode inserted event")?;
        Ok(created)
    }

    pub async fn patch_event(&self, event_id: &str, event: &GcalEvent) -> Result<GcalEvent> {
        let updated = self
            .http
            .patch(self.event_url(event_id))
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .context("Event patch request failed")?
            .error_for_status()
            .context("Event patch returned an error status")?
            .json()
            .await
            .context("Failed to decode patched event")?;
        Ok(updated)
    }

    /// Delete an event. An event that is already gone counts as deleted.
    pub async fn delete_event(&self, event_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.event_url(event_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Event delete request failed")?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Ok(())
        } else {
            anyhow::bail!("Event delete returned {status}")
        }
    }
}

/// Extract the lesson identity from an event, if it is one of ours.
///
/// The structured private property is the source of truth; events created
/// before it existed are recognized by the AUTO-TAG sentinel in their
/// description, with the identity right before it. An event with neither was
/// not created by this syncer and must never be touched.
pub fn lesson_id_from_event(event: &GcalEvent) -> Option<String> {
    if let Some(props) = &event.extended_properties {
        if let Some(id) = props.private.get(PRIVATE_ID_KEY) {
            return Some(id.clone());
        }
    }

    if let Some((id, _)) = event.description.split_once(AUTO_TAG) {
        return Some(id.trim().to_string());
    }

    None
}

/// Build the full event body for a projection, used for both inserts and
/// patches. Carries the structured identity property, so patching a legacy
/// event upgrades it in passing.
pub fn to_event(projection: &EventProjection) -> GcalEvent {
    GcalEvent {
        id: String::new(),
        summary: projection.summary.clone(),
        description: projection.description.clone(),
        location: projection.location.clone(),
        color_id: projection.color_id.clone(),
        start: Some(EventDateTime {
            date: None,
            date_time: Some(projection.start),
            time_zone: CALENDAR_TIME_ZONE.to_string(),
        }),
        end: Some(EventDateTime {
            date: None,
            date_time: Some(projection.end),
            time_zone: CALENDAR_TIME_ZONE.to_string(),
        }),
        extended_properties: Some(ExtendedProperties {
            private: HashMap::from([(PRIVATE_ID_KEY.to_string(), projection.lesson_id.clone())]),
        }),
        reminders: Some(Reminders {
            use_default: false,
            overrides: vec![ReminderOverride {
                method: "popup".to_string(),
                minutes: 10,
            }],
        }),
        status: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson;
    use chrono::NaiveDate;
    use serde_json::json;

    fn projection() -> EventProjection {
        let lesson = lesson::Lesson {
            lesson_number: 1,
            time_range: "09:00–10:30".to_string(),
            discipline: "Math".to_string(),
            discipline_type: "Лек".to_string(),
            teacher: "Petrov P.P.".to_string(),
            day: "Понедельник".to_string(),
            classroom: "305".to_string(),
        };
        let colors = HashMap::from([("Лек".to_string(), "11".to_string())]);
        lesson::project(
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            &lesson,
            &colors,
        )
        .unwrap()
    }

    #[test]
    fn test_lesson_id_prefers_private_property() {
        let event = GcalEvent {
            description: "something else [AUTO-UNI]".to_string(),
            extended_properties: Some(ExtendedProperties {
                private: HashMap::from([("lesson_id".to_string(), "the-real-id".to_string())]),
            }),
            ..Default::default()
        };
        assert_eq!(lesson_id_from_event(&event), Some("the-real-id".to_string()));
    }

    #[test]
    fn test_lesson_id_recovered_from_legacy_description() {
        let event = GcalEvent {
            description: "01.09.2025|09:00–10:30|Petrov P.P.|305 [AUTO-UNI]".to_string(),
            ..Default::default()
        };
        assert_eq!(
            lesson_id_from_event(&event),
            Some("01.09.2025|09:00–10:30|Petrov P.P.|305".to_string())
        );
    }

    #[test]
    fn test_foreign_event_yields_no_lesson_id() {
        let event = GcalEvent {
            summary: "Dentist".to_string(),
            description: "bring the referral".to_string(),
            ..Default::default()
        };
        assert_eq!(lesson_id_from_event(&event), None);
    }

    #[test]
    fn test_to_event_carries_identity_tag_and_reminder() {
        let projection = projection();
        let event = to_event(&projection);

        assert!(event.description.contains(AUTO_TAG));
        assert!(event.description.contains(&projection.lesson_id));
        assert_eq!(
            event.extended_properties.unwrap().private["lesson_id"],
            projection.lesson_id
        );
        let reminders = event.reminders.unwrap();
        assert!(!reminders.use_default);
        assert_eq!(reminders.overrides[0].minutes, 10);
    }

    #[test]
    fn test_event_body_serialization() {
        let body = serde_json::to_value(to_event(&projection())).unwrap();

        assert_eq!(body["summary"], "Math (Лек)");
        assert_eq!(body["colorId"], "11");
        assert_eq!(body["start"]["dateTime"], "2025-09-01T09:00:00+03:00");
        assert_eq!(body["start"]["timeZone"], "Europe/Minsk");
        assert_eq!(
            body["extendedProperties"]["private"]["lesson_id"],
            body["description"].as_str().unwrap().replace(" [AUTO-UNI]", "")
        );
        // New events have no id of their own yet
        assert!(body.get("id").is_none());
    }

    #[test]
    fn test_absent_color_serializes_as_explicit_null() {
        let mut colorless = projection();
        colorless.color_id = None;
        let body = serde_json::to_value(to_event(&colorless)).unwrap();
        assert!(body["colorId"].is_null());
        assert!(body.as_object().unwrap().contains_key("colorId"));
    }

    #[test]
    fn test_event_deserialization_from_api_shape() {
        let event: GcalEvent = serde_json::from_value(json!({
            "kind": "calendar#event",
            "id": "evt123",
            "status": "confirmed",
            "summary": "Math (Лек)",
            "description": "01.09.2025|09:00–10:30|Petrov P.P.|305 [AUTO-UNI]",
            "location": "В 305. Препод: Petrov P.P.",
            "colorId": "11",
            "start": {"dateTime": "2025-09-01T09:00:00+03:00", "timeZone": "Europe/Minsk"},
            "end": {"dateTime": "2025-09-01T10:30:00+03:00", "timeZone": "Europe/Minsk"},
            "extendedProperties": {"private": {"lesson_id": "01.09.2025|09:00–10:30|Petrov P.P.|305"}}
        }))
        .unwrap();

        assert_eq!(event.id, "evt123");
        assert_eq!(event.color_id.as_deref(), Some("11"));
        let start = event.start.unwrap().date_time.unwrap();
        assert_eq!(start.to_rfc3339(), "2025-09-01T09:00:00+03:00");
    }

    #[test]
    fn test_all_day_event_deserializes_without_date_time() {
        let event: GcalEvent = serde_json::from_value(json!({
            "id": "holiday",
            "summary": "Holiday",
            "start": {"date": "2025-09-01"},
            "end": {"date": "2025-09-02"}
        }))
        .unwrap();

        assert_eq!(event.start.as_ref().unwrap().date_time, None);
        assert_eq!(
            event.start.unwrap().date,
            Some(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap())
        );
    }
}
