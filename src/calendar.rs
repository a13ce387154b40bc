pub mod google;
pub mod output;

use super::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone};
use indexmap::IndexMap;
use std::str::FromStr;
use std::sync::Arc;

pub use google::models::Event;

/// Ordering requested from the calendar API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    StartTime,
    Updated,
}

/// Parameters of a single `events.list` call. Deleted events are always excluded and recurring
/// events are always expanded into single instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Lower bound (inclusive) for an event's end time.
    pub time_min: Option<DateTime<FixedOffset>>,
    /// Upper bound (exclusive) for an event's start time.
    pub time_max: Option<DateTime<FixedOffset>>,
    /// Lower bound for an event's last modification time.
    pub updated_min: Option<DateTime<FixedOffset>>,
    pub max_results: Option<u32>,
    pub order_by: OrderBy,
}

/// A half-open query interval `[min, max)`, or `[min, ∞)` if `max` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub min: DateTime<FixedOffset>,
    pub max: Option<DateTime<FixedOffset>>,
}

impl TimeWindow {
    /// The whole calendar day `date` in the local timezone.
    pub fn day(date: &str) -> Result<TimeWindow> {
        TimeWindow::day_in(&Local, date)
    }

    /// From the start of `since` to the end of `to`, or unbounded above without `to`.
    pub fn range(since: &str, to: Option<&str>) -> Result<TimeWindow> {
        TimeWindow::range_in(&Local, since, to)
    }

    pub fn day_in<Tz: TimeZone>(tz: &Tz, date: &str) -> Result<TimeWindow> {
        let date = parse_date(date)?;

        Ok(TimeWindow {
            min: start_of_day(tz, date)?,
            max: Some(end_of_day(tz, date)?),
        })
    }

    pub fn range_in<Tz: TimeZone>(tz: &Tz, since: &str, to: Option<&str>) -> Result<TimeWindow> {
        let min = start_of_day(tz, parse_date(since)?)?;
        let max = to
            .map(|to| parse_date(to).and_then(|date| end_of_day(tz, date)))
            .transpose()?;

        Ok(TimeWindow { min, max })
    }

    fn query(&self, max_results: Option<u32>) -> EventQuery {
        EventQuery {
            time_min: Some(self.min),
            time_max: self.max,
            max_results: max_results.filter(|&count| count > 0),
            ..EventQuery::default()
        }
    }
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| Error::InvalidDate {
        input: input.to_owned(),
    })
}

/// Local midnight of `date`, or the first valid instant after it when midnight is skipped by a
/// DST transition.
pub fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<FixedOffset>> {
    resolve_local(tz, date, NaiveTime::MIN)
}

/// 23:59:59 local time on `date`.
pub fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<FixedOffset>> {
    let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    resolve_local(tz, date, time)
}

fn resolve_local<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<DateTime<FixedOffset>> {
    let naive = date.and_time(time);

    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            // Gaps are at most an hour long in practice.
            let later = naive.checked_add_signed(chrono::Duration::hours(1))?;
            tz.from_local_datetime(&later).earliest()
        })
        .map(|datetime| datetime.fixed_offset())
        .ok_or_else(|| Error::InvalidDate {
            input: date.to_string(),
        })
}

/// Trait implemented by anything that can list the events of a calendar.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Returns the events of `calendar_id` matching `query`, in the order the source returns
    /// them.
    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> Result<Vec<Event>>;
}

/// An `EventSource` that returns events from a static map of calendar id to events. The query
/// is ignored apart from `max_results`.
#[derive(Debug, Default, Clone)]
pub struct StaticEventSource {
    calendars: IndexMap<String, Vec<Event>>,
}

impl StaticEventSource {
    /// Creates a new `StaticEventSource` from an iterator of `(calendar id, events)` pairs.
    pub fn new<I, S>(iter: I) -> StaticEventSource
    where
        I: IntoIterator<Item = (S, Vec<Event>)>,
        S: Into<String>,
    {
        StaticEventSource {
            calendars: iter
                .into_iter()
                .map(|(id, events)| (id.into(), events))
                .collect(),
        }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> Result<Vec<Event>> {
        let mut events = self
            .calendars
            .get(calendar_id)
            .cloned()
            .unwrap_or_default();

        if let Some(count) = query.max_results {
            events.truncate(count as usize);
        }

        Ok(events)
    }
}

#[async_trait]
impl<T> EventSource for Box<T>
where
    T: EventSource + ?Sized,
{
    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> Result<Vec<Event>> {
        (**self).list_events(calendar_id, query).await
    }
}

#[async_trait]
impl<T> EventSource for Arc<T>
where
    T: EventSource + ?Sized,
{
    async fn list_events(&self, calendar_id: &str, query: &EventQuery) -> Result<Vec<Event>> {
        (**self).list_events(calendar_id, query).await
    }
}

/// Queries every calendar one after another and concatenates the results in calendar order.
/// The first failing calendar aborts the whole fetch.
async fn fetch_all<S>(source: &S, calendar_ids: &[String], query: &EventQuery) -> Result<Vec<Event>>
where
    S: EventSource + ?Sized,
{
    let mut events = Vec::new();

    for calendar_id in calendar_ids {
        events.extend(source.list_events(calendar_id, query).await?);
    }

    Ok(events)
}

/// Fetches the events of all calendars within `window`, each calendar capped at `max_results`
/// events if it is positive. Events appearing in several calendars are not merged.
pub async fn fetch_events<S>(
    source: &S,
    calendar_ids: &[String],
    window: &TimeWindow,
    max_results: Option<u32>,
) -> Result<Vec<Event>>
where
    S: EventSource + ?Sized,
{
    fetch_all(source, calendar_ids, &window.query(max_results)).await
}

/// Fetches events starting from `now` on that were modified at or after `since`.
pub async fn fetch_updated_since<S>(
    source: &S,
    calendar_ids: &[String],
    now: DateTime<FixedOffset>,
    since: DateTime<FixedOffset>,
    max_results: Option<u32>,
) -> Result<Vec<Event>>
where
    S: EventSource + ?Sized,
{
    let query = EventQuery {
        time_min: Some(now),
        updated_min: Some(since),
        max_results: max_results.filter(|&count| count > 0),
        order_by: OrderBy::Updated,
        ..EventQuery::default()
    };

    fetch_all(source, calendar_ids, &query).await
}

/// Drops every event the authenticated user declined.
pub fn filter_declined(events: Vec<Event>) -> Vec<Event> {
    events
        .into_iter()
        .filter(|event| !event.is_declined())
        .collect()
}

/// Supported sort orders for event lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Ascending by start time, timed events before all-day ones.
    Start,
    /// Most recently updated first.
    Updated,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(SortKey::Start),
            "updated" => Ok(SortKey::Updated),
            other => Err(other.to_owned()),
        }
    }
}

/// Sorts events in place. The sort is stable, so events that compare equal keep their
/// relative order.
pub fn sort_events(events: &mut [Event], key: SortKey) {
    match key {
        SortKey::Start => events.sort_by_key(|event| {
            let start = event.start_timestamp();
            (start.is_none(), start)
        }),
        SortKey::Updated => events.sort_by(|a, b| {
            let (a, b) = (a.updated_timestamp(), b.updated_timestamp());
            // `None` sorts first in ascending order, hence last here.
            b.cmp(&a)
        }),
    }
}

/// Sorts events by a key given by name. Unknown keys leave the order untouched.
pub fn sort_events_by(events: &mut [Event], key: &str) {
    match key.parse::<SortKey>() {
        Ok(key) => sort_events(events, key),
        Err(key) => log::warn!("unknown sort key `{key}`, leaving events unsorted"),
    }
}

/// What `list` fetches and how it prints the result.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub window: TimeWindow,
    /// Per-calendar cap, `0` for none.
    pub max_results: u32,
    pub include_declined: bool,
    /// Sort key name, see [`SortKey`].
    pub sort: String,
    /// Output format name, see [`output::OutputFormat`].
    pub format: String,
}

/// Fetches the events of all calendars, drops declined ones unless asked not to, sorts and
/// renders them. An unknown format fails before any calendar is queried.
pub async fn list<S>(source: &S, calendar_ids: &[String], options: &ListOptions) -> Result<String>
where
    S: EventSource + ?Sized,
{
    let format: output::OutputFormat = options.format.parse()?;

    let mut events = fetch_events(
        source,
        calendar_ids,
        &options.window,
        Some(options.max_results),
    )
    .await?;

    if !options.include_declined {
        events = filter_declined(events);
    }

    sort_events_by(&mut events, &options.sort);

    output::render(&events, format)
}
