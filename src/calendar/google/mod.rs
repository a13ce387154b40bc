pub mod auth;
pub mod models;

use crate::calendar::{EventQuery, EventSource, OrderBy};
use async_trait::async_trait;
use chrono::SecondsFormat;
use google_cloud_token::TokenSource;
use http::Extensions;
use indexmap::IndexMap;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const EVENTS_BASE_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Error while making a http request.
    #[error("failure requesting remote resource: {0}")]
    Request(#[from] reqwest::Error),

    /// Error while executing some middleware code.
    #[error("request middleware failed with: {0}")]
    RequestMiddleware(#[from] reqwest_middleware::Error),

    /// Error while building http headers.
    #[error("encountered invalid HTTP header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    /// Error while building the request URL.
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    /// Error while obtaining an authentication token.
    #[error("failed to obtain authentication token: {0}")]
    Token(String),
}

impl From<ClientError> for reqwest_middleware::Error {
    fn from(err: ClientError) -> Self {
        reqwest_middleware::Error::Middleware(anyhow::Error::new(err))
    }
}

struct AuthMiddleware {
    token_source: Arc<dyn TokenSource>,
}

impl AuthMiddleware {
    fn new(token_source: Arc<dyn TokenSource>) -> AuthMiddleware {
        AuthMiddleware { token_source }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self
            .token_source
            .token()
            .await
            .map_err(|err| ClientError::Token(err.to_string()))?;

        let mut header = HeaderValue::try_from(token).map_err(ClientError::from)?;
        header.set_sensitive(true);
        req.headers_mut().insert(AUTHORIZATION, header);
        next.run(req, extensions).await
    }
}

/// Google calendar client for making requests to the google calendar api
#[derive(Debug)]
pub struct GoogleCalendarClient {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl GoogleCalendarClient {
    /// Creates a client that authorizes every request with a token from `token_source`.
    pub fn new(token_source: Arc<dyn TokenSource>) -> Result<GoogleCalendarClient, ClientError> {
        GoogleCalendarClient::with_base_url(token_source, Url::parse(EVENTS_BASE_URL)?)
    }

    /// Like [`GoogleCalendarClient::new`], but requests `<base_url><calendar id>/events`.
    pub fn with_base_url(
        token_source: Arc<dyn TokenSource>,
        base_url: Url,
    ) -> Result<GoogleCalendarClient, ClientError> {
        let client = http_client_builder()?.build()?;
        Ok(GoogleCalendarClient::from_client(client, token_source, base_url))
    }

    fn from_client(
        client: reqwest::Client,
        token_source: Arc<dyn TokenSource>,
        base_url: Url,
    ) -> GoogleCalendarClient {
        let client = ClientBuilder::new(client)
            .with(AuthMiddleware::new(token_source))
            .build();

        GoogleCalendarClient { client, base_url }
    }

    /// Lists the events of a single calendar. Only the first page of results is returned; its
    /// size is bounded by `query.max_results` or the server default.
    pub async fn get_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<models::Event>, ClientError> {
        let url = events_url(&self.base_url, calendar_id)?;

        let events = self
            .client
            .get(url)
            .query(&build_query_parameters(query))
            .send()
            .await?
            .error_for_status()?
            .json::<models::Events>()
            .await?;

        log::debug!(
            "fetched {} events from Google Calendar {}",
            events.items.len(),
            calendar_id
        );

        if events.next_page_token.is_some() {
            log::debug!("ignoring further result pages for {}", calendar_id);
        }

        Ok(events.items)
    }
}

#[async_trait]
impl EventSource for GoogleCalendarClient {
    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> crate::Result<Vec<models::Event>> {
        Ok(self.get_events(calendar_id, query).await?)
    }
}

/// Response bodies are gzip-compressed when the server offers it; reqwest negotiates the
/// encoding and decodes transparently.
fn http_client_builder() -> Result<reqwest::ClientBuilder, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("gcal/{}", env!("CARGO_PKG_VERSION")))?,
    );

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .gzip(true)
        .timeout(Duration::from_secs(30)))
}

fn events_url(base_url: &Url, calendar_id: &str) -> Result<Url, ClientError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(calendar_id)
        .push("events");
    Ok(url)
}

fn build_query_parameters(query: &EventQuery) -> IndexMap<&'static str, String> {
    // Google requires rfc3339 format for the times with a fixed offset
    // see: https://developers.google.com/calendar/api/v3/reference/events/list
    let rfc3339 = |ts: &chrono::DateTime<chrono::FixedOffset>| {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    };

    let mut query_parameters: IndexMap<&'static str, String> = IndexMap::from([
        ("showDeleted", "false".to_owned()),
        // expand recurring events into single instances
        ("singleEvents", "true".to_owned()),
    ]);

    let order_by = match query.order_by {
        OrderBy::StartTime => "startTime",
        OrderBy::Updated => "updated",
    };
    query_parameters.insert("orderBy", order_by.to_owned());

    if let Some(time_min) = &query.time_min {
        query_parameters.insert("timeMin", rfc3339(time_min));
    }

    if let Some(time_max) = &query.time_max {
        query_parameters.insert("timeMax", rfc3339(time_max));
    }

    if let Some(updated_min) = &query.updated_min {
        query_parameters.insert("updatedMin", rfc3339(updated_min));
    }

    if let Some(count) = query.max_results {
        // limit the number of events to a specific count
        query_parameters.insert("maxResults", count.to_string());
    }

    query_parameters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// `{"items":[{"id":"a"}]}`, gzip-compressed.
    const GZIPPED_EVENTS: [u8; 42] = [
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0xab, 0x56, 0xca, 0x2c, 0x49,
        0xcd, 0x2d, 0x56, 0xb2, 0x8a, 0xae, 0x56, 0xca, 0x4c, 0x51, 0xb2, 0x52, 0x4a, 0x54, 0xaa,
        0x8d, 0xad, 0x05, 0x00, 0xe8, 0xac, 0x93, 0x5c, 0x16, 0x00, 0x00, 0x00,
    ];

    #[derive(Debug)]
    struct FixedToken;

    #[async_trait]
    impl TokenSource for FixedToken {
        async fn token(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok("Bearer test-token".to_owned())
        }
    }

    /// Answers a single HTTP request with `response` and returns the raw request head.
    async fn serve_once(response: Vec<u8>) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = Url::parse(&format!(
            "http://{}/calendar/v3/calendars/",
            listener.local_addr().unwrap()
        ))
        .unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = stream.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (base_url, server)
    }

    #[tokio::test]
    async fn gzip_encoded_responses_are_decoded() {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json; charset=UTF-8\r\ncontent-encoding: gzip\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            GZIPPED_EVENTS.len()
        )
        .into_bytes();
        response.extend_from_slice(&GZIPPED_EVENTS);
        let (base_url, server) = serve_once(response).await;

        // Bypass any proxy configured in the environment to reach the local server.
        let http = http_client_builder().unwrap().no_proxy().build().unwrap();
        let client = GoogleCalendarClient::from_client(http, Arc::new(FixedToken), base_url);

        let events = client
            .get_events("primary", &EventQuery::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "a");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /calendar/v3/calendars/primary/events?"), "{request}");
        assert!(request.contains("accept-encoding: gzip"), "{request}");
        assert!(request.contains("authorization: bearer test-token"), "{request}");
        assert!(request.contains(&format!("user-agent: gcal/{}\r\n", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn build_query_parameters_without_bounds() {
        let query_parameters = build_query_parameters(&EventQuery::default());

        let expected_parameters = IndexMap::from([
            ("showDeleted", "false".to_owned()),
            ("singleEvents", "true".to_owned()),
            ("orderBy", "startTime".to_owned()),
        ]);

        assert_eq!(expected_parameters, query_parameters);
    }

    #[test]
    fn build_query_parameters_for_time_window() {
        let query = EventQuery {
            time_min: Some(DateTime::parse_from_rfc3339("1996-12-19T00:00:00-08:00").unwrap()),
            time_max: Some(DateTime::parse_from_rfc3339("1996-12-19T23:59:59-08:00").unwrap()),
            max_results: Some(30),
            ..EventQuery::default()
        };

        let expected_parameters = IndexMap::from([
            ("showDeleted", "false".to_owned()),
            ("singleEvents", "true".to_owned()),
            ("orderBy", "startTime".to_owned()),
            ("timeMin", "1996-12-19T00:00:00-08:00".to_owned()),
            ("timeMax", "1996-12-19T23:59:59-08:00".to_owned()),
            ("maxResults", "30".to_owned()),
        ]);

        assert_eq!(expected_parameters, build_query_parameters(&query));
    }

    #[test]
    fn build_query_parameters_for_updates() {
        let query = EventQuery {
            time_min: Some(DateTime::parse_from_rfc3339("2024-06-01T12:30:00+00:00").unwrap()),
            updated_min: Some(DateTime::parse_from_rfc3339("2024-05-01T00:00:00+02:00").unwrap()),
            max_results: Some(10),
            order_by: OrderBy::Updated,
            ..EventQuery::default()
        };

        let expected_parameters = IndexMap::from([
            ("showDeleted", "false".to_owned()),
            ("singleEvents", "true".to_owned()),
            ("orderBy", "updated".to_owned()),
            ("timeMin", "2024-06-01T12:30:00Z".to_owned()),
            ("updatedMin", "2024-05-01T00:00:00+02:00".to_owned()),
            ("maxResults", "10".to_owned()),
        ]);

        assert_eq!(expected_parameters, build_query_parameters(&query));
    }

    #[test]
    fn calendar_id_is_encoded_as_path_segment() {
        let base_url = Url::parse(EVENTS_BASE_URL).unwrap();
        let url = events_url(&base_url, "ja.japanese#holiday@group.v.calendar.google.com").unwrap();

        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/ja.japanese%23holiday@group.v.calendar.google.com/events"
        );
    }
}
