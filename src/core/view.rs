//! Filtered, sorted projection over the active or closed connection set.
//!
//! [`render_connections`] is a pure function of (state, query).
//! [`ConnectionView`] memoizes it per state revision and caches the compiled
//! quick-filter regex per pattern; any query change invalidates the cache.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::traffic::{ConnectionsState, TrackedConnection};
use crate::config::{self, SettingsStore};
use crate::error::AppError;

/// Which connection set to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSet {
    #[default]
    Active,
    Closed,
}

/// Sort order for the rendered list. Ties always fall back to id ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
    /// Host (or destination IP when host is empty), ascending.
    #[default]
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "rule")]
    Rule,
    #[serde(rename = "chains")]
    Chains,
    #[serde(rename = "type")]
    Type,
    /// Newest connection first.
    #[serde(rename = "connectTime")]
    ConnectTime,
    #[serde(rename = "download")]
    Download,
    #[serde(rename = "downloadSpeed")]
    DownloadSpeed,
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "uploadSpeed")]
    UploadSpeed,
    #[serde(rename = "sourceIP")]
    SourceIp,
}

impl SortKey {
    pub const ALL: [SortKey; 10] = [
        SortKey::Host,
        SortKey::Rule,
        SortKey::Chains,
        SortKey::Type,
        SortKey::ConnectTime,
        SortKey::Download,
        SortKey::DownloadSpeed,
        SortKey::Upload,
        SortKey::UploadSpeed,
        SortKey::SourceIp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Host => "host",
            SortKey::Rule => "rule",
            SortKey::Chains => "chains",
            SortKey::Type => "type",
            SortKey::ConnectTime => "connectTime",
            SortKey::Download => "download",
            SortKey::DownloadSpeed => "downloadSpeed",
            SortKey::Upload => "upload",
            SortKey::UploadSpeed => "uploadSpeed",
            SortKey::SourceIp => "sourceIP",
        }
    }

    fn compare(&self, a: &TrackedConnection, b: &TrackedConnection) -> Ordering {
        let (ra, rb) = (&a.record, &b.record);
        match self {
            SortKey::Host => ra.metadata.host_or_ip().cmp(rb.metadata.host_or_ip()),
            SortKey::Rule => ra.rule.cmp(&rb.rule),
            SortKey::Chains => ra
                .chains
                .iter()
                .flat_map(|s| s.bytes())
                .cmp(rb.chains.iter().flat_map(|s| s.bytes())),
            SortKey::Type => ra.metadata.conn_type.cmp(&rb.metadata.conn_type),
            SortKey::ConnectTime => rb.start.cmp(&ra.start),
            SortKey::Download => rb.download.cmp(&ra.download),
            SortKey::DownloadSpeed => b.download_speed.cmp(&a.download_speed),
            SortKey::Upload => rb.upload.cmp(&ra.upload),
            SortKey::UploadSpeed => b.upload_speed.cmp(&a.upload_speed),
            SortKey::SourceIp => ra.metadata.source_ip.cmp(&rb.metadata.source_ip),
        }
    }
}

impl FromStr for SortKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown sort key: {s}")))
    }
}

/// Externally configurable presentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewQuery {
    pub set: ConnectionSet,
    pub quick_filter_enabled: bool,
    /// Exclusion pattern: matching connections are hidden.
    pub quick_filter_regex: String,
    /// Inclusion substring over metadata, each chain name, and rule.
    pub filter: String,
    pub sort: SortKey,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            set: ConnectionSet::Active,
            quick_filter_enabled: config::DEFAULT_QUICK_FILTER_ENABLED,
            quick_filter_regex: config::DEFAULT_QUICK_FILTER_REGEX.to_string(),
            filter: String::new(),
            sort: SortKey::default(),
        }
    }
}

impl ViewQuery {
    /// Load persisted settings, falling back to defaults for missing or unreadable values.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut query = Self::default();
        if let Some(pattern) = store.get(config::KEY_QUICK_FILTER_REGEX) {
            query.quick_filter_regex = pattern;
        }
        if let Some(enabled) = store.get(config::KEY_QUICK_FILTER_ENABLED) {
            match enabled.parse::<bool>() {
                Ok(v) => query.quick_filter_enabled = v,
                Err(_) => tracing::warn!("Ignoring stored quick-filter flag {enabled:?}"),
            }
        }
        if let Some(sort) = store.get(config::KEY_CONNECTION_SORT_TYPE) {
            match sort.parse::<SortKey>() {
                Ok(k) => query.sort = k,
                Err(e) => tracing::warn!("Ignoring stored sort type: {e}"),
            }
        }
        query
    }

    /// Persist the settings the store owns. Set toggle and free-text filter are session-only.
    pub fn persist(&self, store: &dyn SettingsStore) {
        store.set(config::KEY_QUICK_FILTER_REGEX, self.quick_filter_regex.clone());
        store.set(
            config::KEY_QUICK_FILTER_ENABLED,
            self.quick_filter_enabled.to_string(),
        );
        store.set(config::KEY_CONNECTION_SORT_TYPE, self.sort.as_str().to_string());
    }

    fn quick_filter_active(&self) -> bool {
        self.quick_filter_enabled && !self.quick_filter_regex.is_empty()
    }
}

/// Output of one view evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedView {
    pub connections: Vec<Arc<TrackedConnection>>,
    /// Set when the quick filter was skipped because its pattern is invalid.
    pub warning: Option<AppError>,
    /// Revision of the state this view was computed from.
    pub revision: u64,
}

/// Compile the quick-filter pattern, or `None` when the filter is inactive.
pub fn compile_quick_filter(query: &ViewQuery) -> Option<Result<Regex, AppError>> {
    query
        .quick_filter_active()
        .then(|| Regex::new(&query.quick_filter_regex).map_err(AppError::from))
}

/// Evaluate the view from scratch.
pub fn render_connections(state: &ConnectionsState, query: &ViewQuery) -> RenderedView {
    let compiled = compile_quick_filter(query);
    let (quick, warning) = split_compiled(compiled.as_ref());
    if let Some(err) = &warning {
        tracing::warn!("Quick filter disabled for this evaluation: {err}");
    }
    RenderedView {
        connections: filter_and_sort(state, query, quick),
        warning,
        revision: state.revision,
    }
}

fn split_compiled(compiled: Option<&Result<Regex, AppError>>) -> (Option<&Regex>, Option<AppError>) {
    match compiled {
        Some(Ok(re)) => (Some(re), None),
        Some(Err(e)) => (None, Some(e.clone())),
        None => (None, None),
    }
}

fn filter_and_sort(
    state: &ConnectionsState,
    query: &ViewQuery,
    quick: Option<&Regex>,
) -> Vec<Arc<TrackedConnection>> {
    let source = match query.set {
        ConnectionSet::Active => &state.active,
        ConnectionSet::Closed => &state.closed,
    };

    let mut out: Vec<Arc<TrackedConnection>> = source
        .iter()
        .filter(|c| quick.map_or(true, |re| !quick_filter_matches(re, c)))
        .filter(|c| query.filter.is_empty() || text_filter_matches(&query.filter, c))
        .cloned()
        .collect();

    out.sort_by(|a, b| query.sort.compare(a, b).then_with(|| a.id().cmp(b.id())));
    out
}

fn quick_filter_matches(re: &Regex, conn: &TrackedConnection) -> bool {
    let r = &conn.record;
    re.is_match(&r.joined_chains())
        || re.is_match(&r.metadata.host)
        || re.is_match(&r.metadata.destination_ip)
}

fn text_filter_matches(needle: &str, conn: &TrackedConnection) -> bool {
    let r = &conn.record;
    let m = &r.metadata;
    [
        &m.host,
        &m.destination_ip,
        &m.destination_port,
        &m.source_ip,
        &m.source_port,
        &m.process_path,
        &m.conn_type,
        &m.network,
        &r.rule,
    ]
    .into_iter()
    .chain(r.chains.iter())
    .any(|field| field.contains(needle))
}

/// Memoizing wrapper around [`render_connections`].
#[derive(Debug, Default)]
pub struct ConnectionView {
    query: ViewQuery,
    compiled: Option<(String, Result<Regex, AppError>)>,
    cache: Option<Arc<RenderedView>>,
}

impl ConnectionView {
    pub fn new(query: ViewQuery) -> Self {
        Self {
            query,
            compiled: None,
            cache: None,
        }
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn set_query(&mut self, query: ViewQuery) {
        if query != self.query {
            self.query = query;
            self.cache = None;
        }
    }

    pub fn show(&mut self, set: ConnectionSet) {
        let mut q = self.query.clone();
        q.set = set;
        self.set_query(q);
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        let mut q = self.query.clone();
        q.sort = sort;
        self.set_query(q);
    }

    pub fn set_quick_filter(&mut self, enabled: bool, pattern: impl Into<String>) {
        let mut q = self.query.clone();
        q.quick_filter_enabled = enabled;
        q.quick_filter_regex = pattern.into();
        self.set_query(q);
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        let mut q = self.query.clone();
        q.filter = filter.into();
        self.set_query(q);
    }

    /// Evaluate against `state`, reusing the last result if neither changed.
    pub fn render(&mut self, state: &ConnectionsState) -> Arc<RenderedView> {
        match self.prepare(state.revision) {
            Prepared::Cached(view) => view,
            Prepared::Stale(job) => {
                let view = Arc::new(job.run(state));
                self.offer(&job, Arc::clone(&view));
                view
            }
        }
    }

    /// The cached view for `revision`, or a job that renders it without
    /// borrowing `self`. Lets callers release a shared lock while filtering.
    pub fn prepare(&mut self, revision: u64) -> Prepared {
        if let Some(cached) = &self.cache {
            if cached.revision == revision {
                return Prepared::Cached(Arc::clone(cached));
            }
        }

        let quick = if self.query.quick_filter_active() {
            let pattern = &self.query.quick_filter_regex;
            let stale = self.compiled.as_ref().map_or(true, |(p, _)| p != pattern);
            if stale {
                let result = Regex::new(pattern).map_err(AppError::from);
                if let Err(e) = &result {
                    tracing::warn!("Quick filter disabled: {e}");
                }
                self.compiled = Some((pattern.clone(), result));
            }
            self.compiled.as_ref().map(|(_, r)| r.clone())
        } else {
            None
        };

        Prepared::Stale(RenderJob {
            query: self.query.clone(),
            quick,
        })
    }

    /// Cache a view produced by a job from [`prepare`](Self::prepare).
    /// Dropped if the query changed meanwhile or a newer revision is cached.
    pub fn offer(&mut self, job: &RenderJob, view: Arc<RenderedView>) {
        if job.query != self.query {
            return;
        }
        if let Some(cached) = &self.cache {
            if cached.revision > view.revision {
                return;
            }
        }
        self.cache = Some(view);
    }
}

/// Result of [`ConnectionView::prepare`].
#[derive(Debug)]
pub enum Prepared {
    Cached(Arc<RenderedView>),
    Stale(RenderJob),
}

/// A detached view evaluation: the query plus its compiled quick filter.
#[derive(Debug, Clone)]
pub struct RenderJob {
    query: ViewQuery,
    quick: Option<Result<Regex, AppError>>,
}

impl RenderJob {
    pub fn run(&self, state: &ConnectionsState) -> RenderedView {
        let (re, warning) = split_compiled(self.quick.as_ref());
        RenderedView {
            connections: filter_and_sort(state, &self.query, re),
            warning,
            revision: state.revision,
        }
    }
}
