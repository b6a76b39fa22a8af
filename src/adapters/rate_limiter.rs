use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::trace;

/// 벤더별 최소 요청 간격을 강제하는 레이트 리미터
///
/// 전역 상태가 아니라 주입되는 컴포넌트다. 간격이 차지 않은 요청은
/// 실패하는 대신 지연 뒤에 순서대로 나간다.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: DashMap::new(),
        }
    }

    /// 벤더 슬롯을 획득한다. 필요한 만큼 기다린 뒤 반환된다.
    pub async fn acquire(&self, venue: &str) {
        let slot = self
            .last_request
            .entry(venue.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!("⏱️ Rate limiting {} for {:?}", venue, wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
