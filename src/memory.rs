//! Per-user research memory: trait, in-process store and HTTP client

use crate::keywords;
use crate::types::{MemoryEntry, ScoredMemory};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Append-only, user-scoped history. Reads never cross user boundaries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, entry: &MemoryEntry) -> Result<()>;

    /// Up to `n` most recent entries for the user, newest first
    async fn recent(&self, user_id: &str, n: usize) -> Result<Vec<MemoryEntry>>;

    /// Up to `k` prior entries sharing keywords with `query_text`, best first
    async fn similar(&self, user_id: &str, query_text: &str, k: usize) -> Result<Vec<ScoredMemory>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Rank entries by keyword overlap (ties go to the newer entry). Entries of
/// other users and entries with no overlap are dropped.
pub fn rank_similar(user_id: &str, query_text: &str, entries: Vec<MemoryEntry>, k: usize) -> Vec<ScoredMemory> {
    let query_keywords = keywords::keyword_set(query_text);
    let mut scored: Vec<ScoredMemory> = entries
        .into_iter()
        .filter(|e| e.user_id == user_id)
        .map(|entry| {
            let shared_keywords = keywords::shared_count(&query_keywords, &keywords::keyword_set(&entry.query_text));
            ScoredMemory { entry, shared_keywords }
        })
        .filter(|s| s.shared_keywords > 0)
        .collect();

    scored.sort_by(|a, b| {
        b.shared_keywords
            .cmp(&a.shared_keywords)
            .then(b.entry.created_at.cmp(&a.entry.created_at))
    });
    scored.truncate(k);
    scored
}

type UserLog = Arc<Mutex<VecDeque<MemoryEntry>>>;

/// In-process store. Appends are serialized per user. Lock order is always
/// map then log; a user whose log empties is removed from the map.
pub struct InMemoryMemoryStore {
    users: RwLock<HashMap<String, UserLog>>,
    max_entries_per_user: usize,
    max_age: Option<ChronoDuration>,
}

impl InMemoryMemoryStore {
    pub fn new(max_entries_per_user: usize, max_age_secs: Option<u64>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_entries_per_user,
            max_age: max_age_secs.map(|s| ChronoDuration::seconds(s as i64)),
        }
    }

    async fn log_for(&self, user_id: &str) -> Option<UserLog> {
        self.users.read().await.get(user_id).cloned()
    }

    fn evict(&self, log: &mut VecDeque<MemoryEntry>) {
        while log.len() > self.max_entries_per_user {
            log.pop_front();
        }
        if let Some(max_age) = self.max_age {
            let cutoff = Utc::now() - max_age;
            while log.front().map_or(false, |e| e.created_at < cutoff) {
                log.pop_front();
            }
        }
    }

    /// Live entries for the user, oldest first
    async fn entries(&self, user_id: &str) -> Vec<MemoryEntry> {
        let Some(log) = self.log_for(user_id).await else {
            return Vec::new();
        };
        let live: Vec<MemoryEntry> = {
            let mut log = log.lock().await;
            self.evict(&mut log);
            log.iter().cloned().collect()
        };
        if live.is_empty() {
            self.remove_if_empty(user_id).await;
        }
        live
    }

    async fn remove_if_empty(&self, user_id: &str) {
        let mut users = self.users.write().await;
        let empty = match users.get(user_id) {
            Some(log) => {
                let mut log = log.lock().await;
                self.evict(&mut log);
                log.is_empty()
            }
            None => false,
        };
        if empty {
            users.remove(user_id);
            debug!("Dropped empty memory log for {}", user_id);
        }
    }

    fn push(&self, log: &mut VecDeque<MemoryEntry>, entry: &MemoryEntry) {
        log.push_back(entry.clone());
        self.evict(log);
        debug!("Memory for {} now holds {} entries", entry.user_id, log.len());
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        // map guard held across the push
        {
            let users = self.users.read().await;
            if let Some(log) = users.get(&entry.user_id) {
                self.push(&mut *log.lock().await, entry);
                return Ok(());
            }
        }
        let mut users = self.users.write().await;
        let log = users.entry(entry.user_id.clone()).or_default().clone();
        self.push(&mut *log.lock().await, entry);
        Ok(())
    }

    async fn recent(&self, user_id: &str, n: usize) -> Result<Vec<MemoryEntry>> {
        Ok(self.entries(user_id).await.into_iter().rev().take(n).collect())
    }

    async fn similar(&self, user_id: &str, query_text: &str, k: usize) -> Result<Vec<ScoredMemory>> {
        Ok(rank_similar(user_id, query_text, self.entries(user_id).await, k))
    }
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    entries: Vec<MemoryEntry>,
}

/// Client for a remote memory API
#[derive(Debug, Clone)]
pub struct HttpMemoryStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<MemoryEntry>> {
        debug!("Fetching memories from {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Memory API error {}: {}", status, body);
        }

        let parsed: EntriesResponse = response.json().await?;
        Ok(parsed.entries)
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryStore {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let url = format!("{}/memory/{}", self.base_url, urlencoding::encode(&entry.user_id));
        let response = self.client.post(&url).json(entry).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Memory API error {}: {}", status, body);
        }
        Ok(())
    }

    async fn recent(&self, user_id: &str, n: usize) -> Result<Vec<MemoryEntry>> {
        let url = format!(
            "{}/memory/{}/recent?limit={}",
            self.base_url,
            urlencoding::encode(user_id),
            n
        );
        let mut entries: Vec<MemoryEntry> = self
            .fetch(&url)
            .await?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(n);
        Ok(entries)
    }

    async fn similar(&self, user_id: &str, query_text: &str, k: usize) -> Result<Vec<ScoredMemory>> {
        let url = format!(
            "{}/memory/{}?query={}&limit={}",
            self.base_url,
            urlencoding::encode(user_id),
            urlencoding::encode(query_text),
            k
        );
        // ranking is recomputed locally so both stores agree
        Ok(rank_similar(user_id, query_text, self.fetch(&url).await?, k))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}
