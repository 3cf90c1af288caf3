//! In-process model of a loaded web player tab.
//!
//! A [`Page`] owns three things that the bridges work against:
//! - the page's outbound network entry point, which the capture bridge wraps;
//! - page-global flags, used to detect whether the bridges are already in place;
//! - the message port through which the relay bridge answers requests.
//!
//! Navigating resets all three, which is how captured state gets dropped.

pub mod har;
pub mod http;

use crate::bridge::RelayEnvelope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// A network call as the page would issue it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    /// Header names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.to_ascii_uppercase(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The page's outbound network-call function.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<FetchResponse>;
}

pub type PageId = u64;

static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

pub struct Page {
    id: PageId,
    url: RwLock<String>,
    active: AtomicBool,
    closed: AtomicBool,
    generation: AtomicU64,
    globals: Mutex<HashSet<String>>,
    /// Network layer of the loaded document; never intercepted.
    session: Arc<dyn PageFetch>,
    /// Entry point the page's own scripts call; may be wrapped.
    entry: RwLock<Arc<dyn PageFetch>>,
    port: Mutex<Option<mpsc::Sender<RelayEnvelope>>>,
}

impl Page {
    pub fn new(url: impl Into<String>, session: Arc<dyn PageFetch>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed),
            url: RwLock::new(url.into()),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            globals: Mutex::new(HashSet::new()),
            entry: RwLock::new(session.clone()),
            session,
            port: Mutex::new(None),
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn url(&self) -> String {
        self.url.read().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Bumped on every navigation; lets delayed work notice a reload.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Issue a call through the page's (possibly wrapped) entry point, the way
    /// the page's own scripts do.
    pub async fn fetch(&self, request: FetchRequest) -> anyhow::Result<FetchResponse> {
        let entry = self.entry_point();
        entry.fetch(request).await
    }

    /// The session network layer, bypassing any wrapper.
    pub fn session(&self) -> Arc<dyn PageFetch> {
        self.session.clone()
    }

    pub fn entry_point(&self) -> Arc<dyn PageFetch> {
        match self.entry.read() {
            Ok(e) => e.clone(),
            Err(_) => self.session.clone(),
        }
    }

    /// Replace the entry point with `wrap(current)`, unless the page has
    /// navigated away from `generation` in the meantime.
    pub fn wrap_entry_point<F>(&self, generation: u64, wrap: F) -> bool
    where
        F: FnOnce(Arc<dyn PageFetch>) -> Arc<dyn PageFetch>,
    {
        if self.generation() != generation || self.is_closed() {
            return false;
        }
        match self.entry.write() {
            Ok(mut entry) => {
                let wrapped = wrap(entry.clone());
                *entry = wrapped;
                true
            }
            Err(_) => false,
        }
    }

    pub fn has_global(&self, flag: &str) -> bool {
        self.globals
            .lock()
            .map(|g| g.contains(flag))
            .unwrap_or(false)
    }

    /// Returns false when the flag was already set.
    pub fn set_global(&self, flag: &str) -> bool {
        self.globals
            .lock()
            .map(|mut g| g.insert(flag.to_string()))
            .unwrap_or(false)
    }

    pub fn attach_port(&self, port: mpsc::Sender<RelayEnvelope>) {
        if let Ok(mut p) = self.port.lock() {
            *p = Some(port);
        }
    }

    /// The relay bridge's request port, if one is attached to the current load.
    pub fn port(&self) -> Option<mpsc::Sender<RelayEnvelope>> {
        self.port.lock().ok().and_then(|p| p.clone())
    }

    /// Load a new document: bridges, flags and the relay port are all dropped.
    pub fn navigate(&self, url: impl Into<String>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut u) = self.url.write() {
            *u = url.into();
        }
        self.reset();
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.reset();
    }

    fn reset(&self) {
        if let Ok(mut g) = self.globals.lock() {
            g.clear();
        }
        if let Ok(mut entry) = self.entry.write() {
            *entry = self.session.clone();
        }
        if let Ok(mut p) = self.port.lock() {
            p.take();
        }
    }
}

/// Browser-side lookup of open tabs.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// The active tab whose URL starts with `url_prefix`, if any.
    async fn find_active(&self, url_prefix: &str) -> Option<Arc<Page>>;
}

/// A simple set of open tabs.
#[derive(Default)]
pub struct BrowserTabs {
    pages: Mutex<Vec<Arc<Page>>>,
}

impl BrowserTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, page: Arc<Page>) {
        if let Ok(mut pages) = self.pages.lock() {
            pages.push(page);
        }
    }

    /// Make `id` the only active tab.
    pub fn activate(&self, id: PageId) {
        if let Ok(pages) = self.pages.lock() {
            for p in pages.iter() {
                p.set_active(p.id() == id);
            }
        }
    }

    pub fn close(&self, id: PageId) {
        if let Ok(mut pages) = self.pages.lock() {
            if let Some(p) = pages.iter().find(|p| p.id() == id) {
                p.close();
            }
            pages.retain(|p| p.id() != id);
        }
    }
}

#[async_trait]
impl TabHost for BrowserTabs {
    async fn find_active(&self, url_prefix: &str) -> Option<Arc<Page>> {
        let pages = self.pages.lock().ok()?;
        pages
            .iter()
            .find(|p| p.is_active() && !p.is_closed() && p.url().starts_with(url_prefix))
            .cloned()
    }
}
