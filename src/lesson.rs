//! Lesson types, identity derivation, and projection onto calendar events.
//!
//! The identity key is the join point of the whole sync: it is derived only
//! from the fields that define a real-world class occurrence, so the same
//! lesson produces the same key on every fetch, in any order.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Display format for lesson dates, also used inside identity keys
pub const DATE_FMT: &str = "%d.%m.%Y";

/// Sentinel marking a calendar event as auto-managed. Events created before
/// the structured private property existed carry it in their description,
/// right after the identity key.
pub const AUTO_TAG: &str = "[AUTO-UNI]";

/// Named zone sent alongside event times
pub const CALENDAR_TIME_ZONE: &str = "Europe/Minsk";

/// Minsk is fixed at UTC+3 year-round
const UTC_OFFSET_SECS: i32 = 3 * 3600;

/// One lesson occurrence within a day
#[derive(Debug, Clone, PartialEq)]
pub struct Lesson {
    /// Ordering key within the day
    pub lesson_number: i64,
    /// "HH:MM–HH:MM" wall-clock window
    pub time_range: String,
    pub discipline: String,
    pub discipline_type: String,
    /// Normalized display name, e.g. "Иванов И.И."
    pub teacher: String,
    /// Weekday label from the feed
    pub day: String,
    /// Normalized room, or the "not found" placeholder
    pub classroom: String,
}

/// All lessons on one calendar date, sorted by lesson number
#[derive(Debug, Clone)]
pub struct ScheduleDay {
    pub date: NaiveDate,
    pub day: String,
    pub lessons: Vec<Lesson>,
}

/// Derive the identity key joining a timetable lesson to its calendar event.
/// Pure function of the lesson's defining fields; `|` does not occur inside
/// any of them.
pub fn lesson_id(date: &str, lesson: &Lesson) -> String {
    format!(
        "{date}|{}|{}|{}",
        lesson.time_range, lesson.teacher, lesson.classroom
    )
}

/// The calendar-facing fields derived from one lesson
#[derive(Debug, Clone, PartialEq)]
pub struct EventProjection {
    pub lesson_id: String,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// None when the discipline type has no configured color
    pub color_id: Option<String>,
}

/// Project a lesson into the fields its calendar event must carry.
pub fn project(
    date: NaiveDate,
    lesson: &Lesson,
    colors: &HashMap<String, String>,
) -> Result<EventProjection> {
    let date_str = date.format(DATE_FMT).to_string();
    let id = lesson_id(&date_str, lesson);
    let (start, end) = parse_time_range(&date_str, &lesson.time_range)?;

    Ok(EventProjection {
        summary: format!("{} ({})", lesson.discipline, lesson.discipline_type),
        description: format!("{id} {AUTO_TAG}"),
        location: location(&lesson.classroom, &lesson.teacher),
        color_id: colors.get(&lesson.discipline_type).cloned(),
        lesson_id: id,
        start,
        end,
    })
}

/// "В <classroom>. Препод: <teacher>", dropping either clause when its field
/// is empty or the classroom is still the "not found" placeholder.
fn location(classroom: &str, teacher: &str) -> String {
    let mut parts = Vec::new();
    if !classroom.is_empty() && !classroom.contains("не найден") {
        parts.push(format!("В {classroom}"));
    }
    if !teacher.is_empty() {
        parts.push(format!("Препод: {teacher}"));
    }
    parts.join(". ")
}

/// Parse "HH:MM–HH:MM" on the given date into a pair of fixed UTC+3 instants.
pub fn parse_time_range(
    date: &str,
    time_range: &str,
) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let (time_in, time_out) = time_range
        .split_once('–')
        .with_context(|| format!("Bad time range: {time_range:?}"))?;
    Ok((at_wall_clock(date, time_in)?, at_wall_clock(date, time_out)?))
}

/// Midnight at the start of the given date, in the calendar's fixed offset.
pub fn start_of_day(date: NaiveDate) -> DateTime<FixedOffset> {
    date.and_hms_opt(0, 0, 0)
        .unwrap()
        .and_local_timezone(minsk())
        .unwrap()
}

fn at_wall_clock(date: &str, time: &str) -> Result<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%d.%m.%Y %H:%M")
        .with_context(|| format!("Bad wall-clock time: {date:?} {time:?}"))?;
    Ok(naive.and_local_timezone(minsk()).unwrap())
}

fn minsk() -> FixedOffset {
    FixedOffset::east_opt(UTC_OFFSET_SECS).unwrap()
}
