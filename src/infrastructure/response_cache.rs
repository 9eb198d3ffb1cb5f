//! 响应缓存 - 基础设施层
//!
//! ## 职责
//!
//! - 以 [`RequestFingerprint`] 为键保存 LLM 响应，避免重复的昂贵调用
//! - 容量超限时按最近最少使用（LRU）淘汰，条目按 TTL 过期
//! - 同一指纹同一时刻最多只有一个外部调用：后到的请求等待首个调用的结果
//!
//! ## 失败语义
//!
//! 查询永不报错，未命中与没有缓存无法区分。失败的调用不会写入缓存，
//! 但会共享给正在等待的请求。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::LlmError;
use crate::infrastructure::completion_backend::TokenUsage;
use crate::infrastructure::fingerprint::RequestFingerprint;

/// 缓存中的响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
}

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// 命中已有条目
    Hit,
    /// 由本次请求发起的外部调用
    Fetched,
    /// 等待并共享了另一个请求的调用结果
    Coalesced,
}

/// 缓存查询结果
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub response: CachedResponse,
    pub source: CacheSource,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub coalesced: u64,
}

type FetchResult = Result<CachedResponse, LlmError>;

struct CacheEntry {
    response: CachedResponse,
    /// `None` 表示永不过期
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<RequestFingerprint, CacheEntry>,
    /// LRU 队列（最旧的在前）
    lru_queue: VecDeque<RequestFingerprint>,
    in_flight: HashMap<RequestFingerprint, watch::Receiver<Option<FetchResult>>>,
    stats: CacheStats,
}

impl CacheState {
    fn lookup(&mut self, fingerprint: &RequestFingerprint, now: Instant) -> Option<CachedResponse> {
        let (response, expired) = match self.entries.get(fingerprint) {
            Some(entry) => (entry.response.clone(), entry.is_expired(now)),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove_entry(fingerprint);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        self.touch(fingerprint);
        self.stats.hits += 1;
        Some(response)
    }

    fn insert(
        &mut self,
        capacity: usize,
        fingerprint: RequestFingerprint,
        response: CachedResponse,
        ttl: Duration,
        now: Instant,
    ) {
        if capacity == 0 {
            return;
        }

        self.purge_expired(now);

        if self.entries.contains_key(&fingerprint) {
            self.lru_queue.retain(|k| k != &fingerprint);
        } else {
            while self.entries.len() >= capacity {
                let Some(oldest) = self.lru_queue.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
                debug!("缓存淘汰: {}", oldest.short());
            }
        }

        self.entries.insert(
            fingerprint.clone(),
            CacheEntry {
                response,
                expires_at: now.checked_add(ttl),
            },
        );
        self.lru_queue.push_back(fingerprint);
    }

    fn touch(&mut self, fingerprint: &RequestFingerprint) {
        self.lru_queue.retain(|k| k != fingerprint);
        self.lru_queue.push_back(fingerprint.clone());
    }

    fn remove_entry(&mut self, fingerprint: &RequestFingerprint) {
        self.entries.remove(fingerprint);
        self.lru_queue.retain(|k| k != fingerprint);
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<RequestFingerprint> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for fingerprint in expired {
            self.remove_entry(&fingerprint);
            self.stats.expirations += 1;
        }
    }

    /// 只移除属于同一通道的进行中记录，避免误删后来者登记的调用
    fn release_in_flight(
        &mut self,
        fingerprint: &RequestFingerprint,
        rx: &watch::Receiver<Option<FetchResult>>,
    ) {
        if self
            .in_flight
            .get(fingerprint)
            .is_some_and(|existing| existing.same_channel(rx))
        {
            self.in_flight.remove(fingerprint);
        }
    }
}

/// LLM 响应缓存
///
/// 作为显式拥有的组件注入到 [`crate::services::LlmService`]，
/// 多个并发运行通过 `Arc<ResponseCache>` 共享同一实例。
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// 创建缓存，`capacity` 为 0 时不保存任何条目
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<CachedResponse> {
        self.lock().lookup(fingerprint, Instant::now())
    }

    pub fn put(&self, fingerprint: RequestFingerprint, response: CachedResponse, ttl: Duration) {
        self.lock()
            .insert(self.capacity, fingerprint, response, ttl, Instant::now());
    }

    /// 查询缓存，未命中时调用 `fetch`
    ///
    /// 同一指纹的并发请求只有一个会执行 `fetch`，其余等待它的结果。
    /// 如果执行 `fetch` 的请求被中途丢弃，等待者会重新选出一个执行者。
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        ttl: Duration,
        fetch: F,
    ) -> Result<CacheLookup, LlmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult>,
    {
        let tx = loop {
            let mut rx = {
                let mut state = self.lock();
                if let Some(response) = state.lookup(fingerprint, Instant::now()) {
                    return Ok(CacheLookup {
                        response,
                        source: CacheSource::Hit,
                    });
                }
                match state.in_flight.get(fingerprint) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight.insert(fingerprint.clone(), rx);
                        break tx;
                    }
                }
            };

            debug!("等待进行中的调用: {}", fingerprint.short());
            let shared = match rx.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };

            match shared {
                Some(result) => {
                    self.lock().stats.coalesced += 1;
                    return result.map(|response| CacheLookup {
                        response,
                        source: CacheSource::Coalesced,
                    });
                }
                // 执行者被丢弃，重新竞争
                None => self.lock().release_in_flight(fingerprint, &rx),
            }
        };

        let guard = InFlightGuard {
            cache: self,
            fingerprint,
            rx: tx.subscribe(),
        };

        let result = fetch().await;

        {
            let mut state = self.lock();
            if let Ok(response) = &result {
                state.insert(
                    self.capacity,
                    fingerprint.clone(),
                    response.clone(),
                    ttl,
                    Instant::now(),
                );
            }
            state.release_in_flight(fingerprint, &guard.rx);
        }
        tx.send_replace(Some(result.clone()));
        drop(guard);

        result.map(|response| CacheLookup {
            response,
            source: CacheSource::Fetched,
        })
    }

    /// 清空所有条目（统计保留）
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 执行者的进行中登记，被丢弃时注销
struct InFlightGuard<'a> {
    cache: &'a ResponseCache,
    fingerprint: &'a RequestFingerprint,
    rx: watch::Receiver<Option<FetchResult>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache
            .lock()
            .release_in_flight(self.fingerprint, &self.rx);
    }
}
