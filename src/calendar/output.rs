use super::google::models::Timepoint;
use super::Event;
use crate::{Error, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Write;
use std::str::FromStr;

/// Padding between table columns.
const COLUMN_PADDING: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON array in the Google Calendar API event representation.
    Json,
    /// Aligned `START END TITLE` table.
    Table,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            other => Err(Error::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// Renders `events` in the output format called `format`.
pub fn format_events(events: &[Event], format: &str) -> Result<String> {
    render(events, format.parse()?)
}

pub fn render(events: &[Event], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(events)?),
        OutputFormat::Table => Ok(render_table(events, &Local)),
    }
}

/// Renders events as a table with times shown in `tz`.
pub fn render_table<Tz>(events: &[Event], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let rows: Vec<[String; 3]> = std::iter::once(["START", "END", "TITLE"].map(str::to_owned))
        .chain(events.iter().map(|event| {
            [
                format_time(event.start.as_ref(), tz),
                format_time(event.end.as_ref(), tz),
                event.title().to_owned(),
            ]
        }))
        .collect();

    let width = |column: usize| {
        rows.iter()
            .map(|row| row[column].chars().count())
            .max()
            .unwrap_or_default()
            + COLUMN_PADDING
    };
    let (start_width, end_width) = (width(0), width(1));

    let mut table = String::new();
    for [start, end, title] in &rows {
        // Writing into a String cannot fail.
        let _ = writeln!(table, "{start:<start_width$}{end:<end_width$}{title}");
    }

    table
}

fn format_time<Tz>(time: Option<&Timepoint>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let Some(time) = time else {
        return String::new();
    };

    match time.date_time() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(timestamp) => timestamp.with_timezone(tz).format("%H:%M").to_string(),
            Err(_) => raw.to_owned(),
        },
        None if time.is_all_day() => "(all-day)".to_owned(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn events() -> Vec<Event> {
        serde_json::from_value(json!([
            {
                "id": "standup",
                "summary": "Standup",
                "start": { "dateTime": "2024-05-03T09:00:00+09:00" },
                "end": { "dateTime": "2024-05-03T09:15:00+09:00" },
                "htmlLink": "https://www.google.com/calendar/event?eid=abc"
            },
            {
                "id": "holiday",
                "summary": "Constitution Memorial Day",
                "start": { "date": "2024-05-03" },
                "end": { "date": "2024-05-04" }
            },
            { "id": "bare" }
        ]))
        .unwrap()
    }

    #[test]
    fn empty_table_has_header_only() {
        assert_eq!(format_events(&[], "table").unwrap().lines().count(), 1);
        assert_eq!(render_table(&[], &FixedOffset::east_opt(0).unwrap()), "START  END  TITLE\n");
    }

    #[test]
    fn table_columns_are_aligned() {
        let table = render_table(&events(), &FixedOffset::east_opt(9 * 3600).unwrap());

        let expected = [
            "START      END        TITLE\n".to_owned(),
            "09:00      09:15      Standup\n".to_owned(),
            "(all-day)  (all-day)  Constitution Memorial Day\n".to_owned(),
            // Neither start nor end: both columns are blank.
            format!("{}\n", " ".repeat(22)),
        ]
        .concat();

        assert_eq!(table, expected);
    }

    #[test]
    fn table_times_use_requested_timezone() {
        let table = render_table(&events()[..1], &FixedOffset::east_opt(0).unwrap());
        assert_eq!(table.lines().nth(1), Some("00:00  00:15  Standup"));
    }

    #[test]
    fn json_keeps_identifiers_and_fields() {
        let events = events();
        let output = format_events(&events, "json").unwrap();
        assert!(!output.ends_with('\n'));

        let parsed: Vec<serde_json::Value> = serde_json::from_str(&output).unwrap();
        let ids: Vec<_> = parsed.iter().map(|event| event["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["standup", "holiday", "bare"]);
        assert_eq!(
            parsed[0]["htmlLink"],
            "https://www.google.com/calendar/event?eid=abc"
        );
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = format_events(&events(), "xml").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(format) if format == "xml"));
    }
}
