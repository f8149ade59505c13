//! Timetable endpoint client and normalization into per-day lesson lists.

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::lesson::{Lesson, ScheduleDay};

const TIMETABLE_URL: &str = "http://www.timetable.bsufl.by/api/api/groupschedule";
const ORIGIN: &str = "http://timetable.bsufl.by";

/// End of the window when no explicit range is given
const FAR_FUTURE_END: &str = "2025-12-31";

/// Shown instead of a room when the feed has not assigned one yet
pub const CLASSROOM_PLACEHOLDER: &str = "Кабинет не найден, но скоро появится...";

/// One flat timetable entry as the feed serves it. Teacher name parts and
/// the classroom are frequently null upstream; everything else is required
/// and its absence makes the record malformed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLessonRecord {
    /// Anchor date of the week, "YYYY-MM-DD"
    pub date_in: String,
    /// 1-based offset from the anchor
    pub day_number: i64,
    pub lesson_number: i64,
    pub time_in: String,
    pub time_out: String,
    pub discipline: String,
    pub discipline_type: String,
    #[serde(default)]
    pub teacher_f: Option<String>,
    #[serde(default)]
    pub teacher_n: Option<String>,
    #[serde(default)]
    pub teacher_o: Option<String>,
    #[serde(default)]
    pub classroom: Option<String>,
    pub day: String,
}

pub struct TimetableClient {
    http: reqwest::Client,
}

impl TimetableClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Fetch the schedule for a group and normalize it into date-sorted days.
    /// One outbound call, no retries — a transient failure propagates to the
    /// caller and the next scheduled pass tries again.
    pub async fn fetch_schedule(
        &self,
        group_id: u64,
        range: Option<(NaiveDate, NaiveDate)>,
        stop_words: &[String],
    ) -> Result<Vec<ScheduleDay>> {
        let (start_date, end_date) = match range {
            Some((start, end)) => (start, end),
            None => (
                Local::now().date_naive(),
                NaiveDate::parse_from_str(FAR_FUTURE_END, "%Y-%m-%d").unwrap(),
            ),
        };
        anyhow::ensure!(
            start_date <= end_date,
            "Date range is decreasing: {start_date} > {end_date}"
        );

        let request_id = format!(
            "{}--{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );

        let records: Vec<serde_json::Value> = self
            .http
            .get(TIMETABLE_URL)
            .query(&[
                ("startDate", start_date.format("%Y-%m-%d").to_string()),
                ("endDate", end_date.format("%Y-%m-%d").to_string()),
                ("idGroup", group_id.to_string()),
            ])
            .header("Origin", ORIGIN)
            .header("Referer", format!("{ORIGIN}/schedule"))
            .header("User-Agent", "Mozilla/5.0")
            .header("Accept", "application/json, text/plain, */*")
            .header("X-Request-Id", request_id)
            .header("X-Request-Origin", ORIGIN)
            .header("X-Timestamp", Utc::now().timestamp_millis().to_string())
            .send()
            .await
            .context("Timetable request failed")?
            .error_for_status()
            .context("Timetable endpoint returned an error status")?
            .json()
            .await
            .context("Failed to decode timetable response")?;

        Ok(build_days(records, stop_words))
    }
}

/// Group raw records into date-sorted days of lesson-number-sorted lessons.
/// A record that fails extraction is logged and skipped on its own; it never
/// aborts the rest of the fetch.
pub fn build_days(records: Vec<serde_json::Value>, stop_words: &[String]) -> Vec<ScheduleDay> {
    let mut grouped: BTreeMap<NaiveDate, Vec<Lesson>> = BTreeMap::new();

    for value in records {
        let record: RawLessonRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("⚠️ Skipping undecodable timetable record: {e}");
                continue;
            }
        };

        if is_stopped(&record, stop_words) {
            continue;
        }

        match normalize_record(&record) {
            Ok((date, lesson)) => grouped.entry(date).or_default().push(lesson),
            Err(e) => eprintln!("⚠️ Skipping malformed timetable record: {e:#}"),
        }
    }

    grouped
        .into_iter()
        .map(|(date, mut lessons)| {
            lessons.sort_by_key(|lesson| lesson.lesson_number);
            let day = lessons[0].day.clone();
            ScheduleDay { date, day, lessons }
        })
        .collect()
}

fn is_stopped(record: &RawLessonRecord, stop_words: &[String]) -> bool {
    let discipline = record.discipline.to_lowercase();
    let teacher_f = record
        .teacher_f
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    stop_words.iter().any(|word| {
        let word = word.to_lowercase();
        discipline.contains(&word) || teacher_f.contains(&word)
    })
}

fn normalize_record(record: &RawLessonRecord) -> Result<(NaiveDate, Lesson)> {
    let anchor = NaiveDate::parse_from_str(&record.date_in, "%Y-%m-%d")
        .with_context(|| format!("Bad dateIn: {:?}", record.date_in))?;
    let date = anchor + Duration::days(record.day_number - 1);

    // Validate the wall-clock fields now so a bad record is dropped here,
    // not halfway through projecting events.
    for time in [&record.time_in, &record.time_out] {
        NaiveTime::parse_from_str(time, "%H:%M")
            .with_context(|| format!("Bad lesson time: {time:?}"))?;
    }

    let lesson = Lesson {
        lesson_number: record.lesson_number,
        time_range: format!("{}–{}", record.time_in, record.time_out),
        discipline: record.discipline.clone(),
        discipline_type: record.discipline_type.clone(),
        teacher: normalize_teacher(
            record.teacher_f.as_deref().unwrap_or_default(),
            record.teacher_n.as_deref().unwrap_or_default(),
            record.teacher_o.as_deref().unwrap_or_default(),
        ),
        day: record.day.clone(),
        classroom: normalize_classroom(record.classroom.as_deref()),
    };

    Ok((date, lesson))
}

/// Surname in full, then a dotted initial for each further non-empty name
/// part: ("Иванов", "Иван", "Иванович") → "Иванов И.И.".
pub fn normalize_teacher(f: &str, n: &str, o: &str) -> String {
    let parts: Vec<&str> = [f, n, o].into_iter().filter(|p| !p.is_empty()).collect();

    let Some((surname, rest)) = parts.split_first() else {
        return String::new();
    };

    let initials: String = rest
        .iter()
        .filter_map(|part| part.chars().next())
        .map(|initial| format!("{initial}."))
        .collect();

    if initials.is_empty() {
        surname.to_string()
    } else {
        format!("{surname} {initials}")
    }
}

/// Rooms come prefixed with "ка"; a bare "ауд" marker (or nothing at all)
/// means the room has not been assigned yet.
pub fn normalize_classroom(classroom: Option<&str>) -> String {
    match classroom {
        Some(room) if !room.is_empty() && !room.to_lowercase().starts_with("ауд") => {
            room.chars().skip(2).collect()
        }
        _ => CLASSROOM_PLACEHOLDER.to_string(),
    }
}
