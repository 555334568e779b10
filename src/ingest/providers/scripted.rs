// src/ingest/providers/scripted.rs
//! Deterministic upstream driven by a script of pages and failures.
//! Used by tests and for dry runs of a harvester configuration.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::CursorPolicy;
use crate::ingest::types::{Page, PageParam, PageRequest, RawItem, UpstreamApi};

#[derive(Debug, Clone)]
pub enum Step {
    Page(Page),
    Fail(HarvestError),
    /// Sleep before answering with an empty page; trips the fetch timeout.
    Hang(Duration),
}

pub struct ScriptedApi {
    name: String,
    policy: CursorPolicy,
    steps: VecDeque<Step>,
    sessions: VecDeque<Result<()>>,
    needs_session: bool,
    /// Every page request received, in order.
    pub requests: Arc<Mutex<Vec<PageRequest>>>,
    /// Number of `open_session` calls.
    pub session_calls: Arc<Mutex<usize>>,
}

impl ScriptedApi {
    pub fn new(name: impl Into<String>, policy: CursorPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            steps: VecDeque::new(),
            sessions: VecDeque::new(),
            needs_session: false,
            requests: Arc::new(Mutex::new(Vec::new())),
            session_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn page(mut self, items: Vec<RawItem>, next: Option<PageParam>) -> Self {
        self.steps.push_back(Step::Page(Page { items, next }));
        self
    }

    pub fn fail(mut self, err: HarvestError) -> Self {
        self.steps.push_back(Step::Fail(err));
        self
    }

    pub fn hang(mut self, d: Duration) -> Self {
        self.steps.push_back(Step::Hang(d));
        self
    }

    /// Require a session; each `open_session` pops the next scripted result,
    /// succeeding once the script runs out.
    pub fn with_sessions(mut self, results: Vec<Result<()>>) -> Self {
        self.needs_session = true;
        self.sessions = results.into();
        self
    }
}

#[async_trait]
impl UpstreamApi for ScriptedApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor_policy(&self) -> CursorPolicy {
        self.policy
    }

    fn needs_session(&self) -> bool {
        self.needs_session
    }

    async fn open_session(&mut self) -> Result<()> {
        *self.session_calls.lock().unwrap() += 1;
        self.sessions.pop_front().unwrap_or(Ok(()))
    }

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page> {
        self.requests.lock().unwrap().push(req.clone());
        match self.steps.pop_front() {
            None => Ok(Page::exhausted()),
            Some(Step::Page(p)) => Ok(p),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Hang(d)) => {
                tokio::time::sleep(d).await;
                Ok(Page::exhausted())
            }
        }
    }
}
