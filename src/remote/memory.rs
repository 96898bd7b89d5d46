//! In-memory remote that records calls, for tests

use super::{RemoteCache, RemoteEntry};
use crate::error::{ProxyError, ProxyResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Recorded `put` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCall {
    pub action_id: String,
    pub output_id: String,
    pub size: u64,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryRemote {
    entries: Mutex<HashMap<String, (String, Vec<u8>)>>,
    puts: Mutex<Vec<PutCall>>,
    gets: AtomicUsize,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
}

impl MemoryRemote {
    pub fn insert(&self, action_id: &str, output_id: &str, body: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .insert(action_id.to_string(), (output_id.to_string(), body.to_vec()));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn put_calls(&self) -> Vec<PutCall> {
        self.puts.lock().unwrap().clone()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteCache for MemoryRemote {
    async fn get(&self, action_id: &str) -> ProxyResult<Option<RemoteEntry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(ProxyError::remote("memory", "connection refused"));
        }

        let found = self.entries.lock().unwrap().get(action_id).cloned();
        Ok(found.map(|(output_id, body)| RemoteEntry::from_bytes(output_id, body)))
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Vec<u8>,
    ) -> ProxyResult<()> {
        self.puts.lock().unwrap().push(PutCall {
            action_id: action_id.to_string(),
            output_id: output_id.to_string(),
            size,
            body: body.clone(),
        });
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ProxyError::remote("memory", "upload rejected"));
        }

        self.insert(action_id, output_id, &body);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
