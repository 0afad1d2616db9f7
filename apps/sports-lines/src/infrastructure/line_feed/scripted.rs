//! Scriptable line feed for tests and local runs without a provider.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{FeedError, LineFeed};
use crate::domain::sport::SportName;

type Reply = Result<Vec<(String, f64)>, FeedError>;

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
    calls: usize,
}

/// `LineFeed` that replays canned replies per sport.
///
/// Queued replies are handed out first, in order. Once a sport's queue is
/// empty its fallback reply is repeated. A sport with neither answers with
/// [`FeedError::Status`] `404`.
#[derive(Debug, Default)]
pub struct ScriptedLineFeed {
    scripts: Mutex<HashMap<SportName, Script>>,
}

impl ScriptedLineFeed {
    /// Create a feed with no replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `sport` with a single line of `value`.
    #[must_use]
    pub fn with_line(self, sport: SportName, value: f64) -> Self {
        self.set_fallback(sport, Ok(vec![(sport.as_str().to_uppercase(), value)]));
        self
    }

    /// Reply used once the sport's queue is drained.
    pub fn set_fallback(&self, sport: SportName, reply: Reply) {
        self.scripts.lock().entry(sport).or_default().fallback = Some(reply);
    }

    /// Queue a one-shot reply for `sport`.
    pub fn enqueue(&self, sport: SportName, reply: Reply) {
        self.scripts.lock().entry(sport).or_default().queued.push_back(reply);
    }

    /// How many times `sport` has been fetched.
    #[must_use]
    pub fn calls(&self, sport: SportName) -> usize {
        self.scripts.lock().get(&sport).map_or(0, |s| s.calls)
    }
}

#[async_trait]
impl LineFeed for ScriptedLineFeed {
    async fn fetch_lines(&self, sport: SportName) -> Result<Vec<(String, f64)>, FeedError> {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(sport).or_default();
        script.calls += 1;

        if let Some(reply) = script.queued.pop_front() {
            return reply;
        }
        script.fallback.clone().unwrap_or(Err(FeedError::Status(404)))
    }
}
