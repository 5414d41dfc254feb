use bookspine::fetch::{FetchError, FetchResult, PartFetcher};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory parts keyed by part number, with a record of every fetch
#[derive(Default)]
pub struct MockPartFetcher {
    parts: HashMap<u32, (Vec<u8>, f64)>,
    fail_on: Option<u32>,
    calls: Mutex<Vec<u32>>,
}

impl MockPartFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` for `part` with the given duration in seconds
    pub fn with_part(mut self, part: u32, content: &[u8], duration: f64) -> Self {
        self.parts.insert(part, (content.to_vec(), duration));
        self
    }

    /// Make every fetch of `part` fail with an HTTP 500
    pub fn failing_on(mut self, part: u32) -> Self {
        self.fail_on = Some(part);
        self
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, part: u32) -> Result<(Vec<u8>, f64), FetchError> {
        self.calls.lock().unwrap().push(part);
        if self.fail_on == Some(part) {
            return Err(FetchError::Status { part, status: 500 });
        }
        self.parts
            .get(&part)
            .cloned()
            .ok_or(FetchError::Status { part, status: 404 })
    }
}

#[async_trait::async_trait]
impl PartFetcher for MockPartFetcher {
    async fn fetch_content(&self, part: u32, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.lookup(part)?.0)
    }

    async fn fetch(&self, part: u32, _url: &str) -> Result<FetchResult, FetchError> {
        let (content, duration) = self.lookup(part)?;
        Ok(FetchResult::new(part, content, duration))
    }
}
