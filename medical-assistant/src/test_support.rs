use assist_flow::{AssistError, ChatRequest, ModelGateway, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

type Reply = Box<dyn Fn(u32) -> Result<String> + Send + Sync>;

/// Gateway double: answers from a closure keyed by call number (1-based)
/// and records every request it sees.
pub struct StubGateway {
    reply: Reply,
    calls: AtomicU32,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubGateway {
    pub fn new(reply: impl Fn(u32) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |_| Ok(body.clone()))
    }

    pub fn failing(message: &'static str) -> Self {
        Self::new(move |_| Err(AssistError::gateway(message)))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelGateway for StubGateway {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        (self.reply)(call)
    }
}
