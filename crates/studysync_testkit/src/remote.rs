//! In-memory remote with scripted failures.

use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use studysync_client::{ClientError, ClientResult, RemoteApi};
use studysync_protocol::{Event, Page, PageRequest, StudyDescriptor};

/// A failure the remote can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Connection failure left over after retries.
    Transient,
    /// HTTP 503.
    ServerError,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 404.
    NotFound,
    /// A body that cannot be decoded.
    Malformed,
}

impl Failure {
    fn to_error(self) -> ClientError {
        match self {
            Failure::Transient => ClientError::transport("injected connection failure"),
            Failure::ServerError => ClientError::ServerError {
                status: 503,
                message: "injected server error".into(),
            },
            Failure::Unauthorized => ClientError::Unauthorized("injected auth failure".into()),
            Failure::NotFound => ClientError::NotFound("injected not found".into()),
            Failure::Malformed => ClientError::Decode(
                studysync_protocol::WireError::invalid_structure("injected malformed page"),
            ),
        }
    }
}

#[derive(Debug)]
struct Rule {
    offset: Option<u64>,
    remaining: u32,
    failure: Failure,
}

/// A [`RemoteApi`] serving a fixed study from memory.
///
/// Events are served sorted by timestamp, like the real service, with
/// offset pagination and an inclusive `since` filter. Failures can be
/// injected for specific offsets or for the next calls.
#[derive(Debug)]
pub struct ScriptedRemote {
    study: String,
    events: RwLock<Vec<Event>>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<PageRequest>>,
    latency: Duration,
    report_total: bool,
    page_cap: Option<u32>,
}

impl ScriptedRemote {
    /// Creates a remote serving `events` for `study`.
    pub fn new(study: impl Into<String>, events: Vec<Event>) -> Self {
        let remote = Self {
            study: study.into(),
            events: RwLock::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            report_total: true,
            page_cap: None,
        };
        remote.push_events(events);
        remote
    }

    /// Delays every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Omits `total` from pages, so paging relies on full pages.
    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    /// Serves at most `cap` events per page, whatever limit is requested.
    pub fn with_page_cap(mut self, cap: u32) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Adds newly arrived events.
    pub fn push_events(&self, events: Vec<Event>) {
        let mut stored = self.events.write();
        stored.extend(events);
        stored.sort_by_key(|e| e.timestamp);
    }

    /// Number of events held.
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Fails the next `times` requests at `offset`.
    pub fn fail_at_offset(&self, offset: u64, times: u32, failure: Failure) {
        self.rules.lock().push(Rule {
            offset: Some(offset),
            remaining: times,
            failure,
        });
    }

    /// Fails the next `times` requests regardless of offset.
    pub fn fail_next(&self, times: u32, failure: Failure) {
        self.rules.lock().push(Rule {
            offset: None,
            remaining: times,
            failure,
        });
    }

    /// Removes all pending failures.
    pub fn clear_failures(&self) {
        self.rules.lock().clear();
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().clone()
    }

    fn injected_failure(&self, offset: u64) -> Option<Failure> {
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.remaining > 0 && r.offset.map_or(true, |o| o == offset))?;
        rule.remaining -= 1;
        Some(rule.failure)
    }
}

impl RemoteApi for ScriptedRemote {
    fn fetch_page(&self, study: &str, request: &PageRequest) -> ClientResult<Page> {
        self.calls.lock().push(request.clone());
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if study != self.study {
            return Err(ClientError::NotFound(format!("/v1/studies/{study}/events")));
        }
        if let Some(failure) = self.injected_failure(request.offset) {
            return Err(failure.to_error());
        }

        let events = self.events.read();
        let matching: Vec<&Event> = events
            .iter()
            .filter(|e| request.since.map_or(true, |since| e.timestamp >= since))
            .collect();

        let limit = self.page_cap.map_or(request.limit, |cap| cap.min(request.limit));
        let total = matching.len() as u64;
        let start = request.offset.min(total);
        let end = (start + u64::from(limit)).min(total);
        let page: Vec<Event> = matching[start as usize..end as usize]
            .iter()
            .map(|e| (*e).clone())
            .collect();

        let next_cursor = if self.report_total {
            (end < total).then_some(end)
        } else {
            (!page.is_empty() && page.len() as u64 == u64::from(limit)).then_some(end)
        };

        Ok(Page {
            events: page,
            offset: request.offset,
            total: self.report_total.then_some(total),
            next_cursor,
        })
    }

    fn list_studies(&self) -> ClientResult<Vec<StudyDescriptor>> {
        Ok(vec![StudyDescriptor::named(self.study.clone())])
    }
}
