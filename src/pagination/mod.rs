//! Cursor pagination over JSON:API `links.next`.

use crate::client::SnykClient;
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use futures::stream::{self, Stream};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

/// Ordered query parameters for a request.
///
/// Setting a key that already exists replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
        self
    }

    /// Builder form of [`QueryParams::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` only if it is not present yet.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        if self.get(&key).is_none() {
            self.pairs.push((key, value.to_string()));
        }
        self
    }

    /// Applies every pair of `other` on top of `self`.
    pub fn merge(mut self, other: &QueryParams) -> Self {
        for (k, v) in &other.pairs {
            self.set(k.clone(), v);
        }
        self
    }

    /// Gets the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encodes the parameters as a query string without the leading `?`.
    pub fn to_query_string(&self) -> SnykResult<String> {
        serde_urlencoded::to_string(&self.pairs).map_err(|e| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Failed to serialize parameters: {}", e),
            )
        })
    }

    /// Builds parameters from any serializable map or struct.
    pub fn from_serializable<P: Serialize>(params: &P) -> SnykResult<Self> {
        let encoded = serde_urlencoded::to_string(params).map_err(|e| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Failed to serialize parameters: {}", e),
            )
        })?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&encoded).map_err(|e| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Failed to decode parameters: {}", e),
            )
        })?;
        Ok(Self { pairs })
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// Extracts `links.next` from a page, ignoring null and empty values.
pub fn next_link(page: &Value) -> Option<String> {
    let next = page.get("links")?.get("next")?;
    let href = match next {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o.get("href")?.as_str()?,
        _ => return None,
    };
    (!href.is_empty()).then(|| href.to_string())
}

#[derive(Debug, Clone)]
enum PageRequest {
    First {
        method: Method,
        endpoint: String,
        params: QueryParams,
        body: Option<Value>,
    },
    Link(String),
}

/// Forward-only cursor over the pages of a list endpoint.
///
/// Only the first request carries the caller's parameters. Every later
/// request is the `links.next` value verbatim, absolute or relative to the
/// client base URL.
pub struct Paginator<'a> {
    client: &'a SnykClient,
    next: Option<PageRequest>,
    headers: Option<HeaderMap>,
    data_key: Option<String>,
    max_pages: Option<usize>,
    pages_fetched: usize,
    buffer: VecDeque<Value>,
}

impl<'a> Paginator<'a> {
    /// Creates a paginator whose first request is `GET endpoint?params`.
    pub fn new(client: &'a SnykClient, endpoint: impl Into<String>, params: QueryParams) -> Self {
        Self::with_first(
            client,
            PageRequest::First {
                method: Method::GET,
                endpoint: endpoint.into(),
                params,
                body: None,
            },
        )
    }

    /// Creates a paginator whose first request is a POST with a JSON body.
    ///
    /// Follow-up pages are still fetched with GET.
    pub fn post(
        client: &'a SnykClient,
        endpoint: impl Into<String>,
        params: QueryParams,
        body: Value,
    ) -> Self {
        Self::with_first(
            client,
            PageRequest::First {
                method: Method::POST,
                endpoint: endpoint.into(),
                params,
                body: Some(body),
            },
        )
    }

    fn with_first(client: &'a SnykClient, first: PageRequest) -> Self {
        Self {
            client,
            next: Some(first),
            headers: None,
            data_key: None,
            max_pages: None,
            pages_fetched: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Flattens the array found at `key` into individual items.
    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = Some(key.into());
        self
    }

    /// Stops after `pages` pages.
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }

    /// Sends extra headers with every page request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Returns the next item (or whole page when no data key is set).
    ///
    /// A failure on the first page is returned to the caller. A failure on
    /// any later page is logged and ends the sequence, keeping what was
    /// already yielded.
    pub async fn next_item(&mut self) -> SnykResult<Option<Value>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }

            let Some(request) = self.next.take() else {
                return Ok(None);
            };

            if let Some(max) = self.max_pages {
                if self.pages_fetched >= max {
                    debug!(max_pages = max, "Reached page limit");
                    return Ok(None);
                }
            }

            let page_number = self.pages_fetched + 1;
            let response = match self.send(&request).await {
                Ok(r) => r,
                Err(e) if self.pages_fetched == 0 => return Err(e),
                Err(e) => {
                    error!(
                        page = page_number,
                        error = %e,
                        "Failed to fetch page, stopping pagination"
                    );
                    return Ok(None);
                }
            };
            self.pages_fetched = page_number;

            let page: Value = match serde_json::from_slice(response.body()) {
                Ok(v) => v,
                Err(e) => {
                    error!(
                        page = page_number,
                        error = %e,
                        "Malformed JSON page, stopping pagination"
                    );
                    return Ok(None);
                }
            };

            self.next = next_link(&page).map(PageRequest::Link);

            match &self.data_key {
                None => self.buffer.push_back(page),
                Some(key) => match page.get(key.as_str()) {
                    None | Some(Value::Null) => {
                        warn!(
                            page = page_number,
                            data_key = %key,
                            "Data key missing from page, stopping pagination"
                        );
                        self.next = None;
                    }
                    Some(Value::Array(_)) => {
                        if let Some(Value::Array(items)) = take_key(page, key) {
                            self.buffer.extend(items);
                        }
                    }
                    Some(_) => {
                        warn!(
                            page = page_number,
                            data_key = %key,
                            "Data key is not an array, yielding it as one item"
                        );
                        if let Some(item) = take_key(page, key) {
                            self.buffer.push_back(item);
                        }
                    }
                },
            }
        }
    }

    /// Drains the sequence into a vector.
    pub async fn collect_all(mut self) -> SnykResult<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Turns the paginator into a lazy stream.
    pub fn into_stream(self) -> impl Stream<Item = SnykResult<Value>> + 'a {
        stream::unfold(Some(self), |state| async move {
            let mut paginator = state?;
            match paginator.next_item().await {
                Ok(Some(item)) => Some((Ok(item), Some(paginator))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn send(&self, request: &PageRequest) -> SnykResult<crate::client::ApiResponse> {
        let headers = self.headers.as_ref();
        match request {
            PageRequest::First {
                method,
                endpoint,
                params,
                body,
            } => {
                self.client
                    .request(method.clone(), endpoint, params, body.as_ref(), headers)
                    .await
            }
            PageRequest::Link(link) => {
                debug!(link = %link, "Following next link");
                self.client
                    .request(Method::GET, link, &QueryParams::new(), None, headers)
                    .await
            }
        }
    }
}

fn take_key(page: Value, key: &str) -> Option<Value> {
    match page {
        Value::Object(mut map) => map.remove(key),
        _ => None,
    }
}
