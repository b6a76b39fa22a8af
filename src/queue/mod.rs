use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::types::RebalanceJob;

/// 큐에 들어있는 작업과 재시도 상태
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: RebalanceJob,
    /// 1부터 시작하는 시도 번호
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// 백오프가 끝나 소비 가능해지는 시각
    pub next_ready_at: DateTime<Utc>,
}

impl QueuedJob {
    fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_ready_at <= now
    }
}

// 우선순위가 높을수록, 같은 우선순위면 먼저 들어온 작업이 먼저 나온다
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

/// 큐 통계
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_retried: u64,
    pub total_exhausted: u64,
    pub current_depth: usize,
}

/// 우선순위 + 재시도 리밸런싱 작업 큐
///
/// at-least-once 전달을 보장한다. 실패한 시도는 지수 백오프 후 재시도되고,
/// 시도 횟수를 소진한 작업은 채널로 내보내져 운영 알림으로 이어진다.
///
/// 알려진 레이스: 소비자가 여럿일 때 같은 전략이 연속으로 두 번 들어오면
/// 두 작업이 동시에 처리될 수 있다. 이 직렬화는 스케줄러의 주기 검사와
/// 큐 처리 순서가 제공하는 것이지 분산 락이 아니다.
pub struct RebalanceQueue {
    heap: RwLock<BinaryHeap<QueuedJob>>,
    stats: RwLock<QueueStats>,
    exhausted_tx: mpsc::UnboundedSender<QueuedJob>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl RebalanceQueue {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (exhausted_tx, exhausted_rx) = mpsc::unbounded_channel();
        (
            Self {
                heap: RwLock::new(BinaryHeap::new()),
                stats: RwLock::new(QueueStats::default()),
                exhausted_tx,
                max_attempts,
                backoff_base,
            },
            exhausted_rx,
        )
    }

    /// 새 작업 추가 (첫 시도는 즉시 소비 가능)
    pub async fn enqueue(&self, job: RebalanceJob) {
        let now = Utc::now();
        let queued = QueuedJob {
            job,
            attempt: 1,
            max_attempts: self.max_attempts,
            enqueued_at: now,
            next_ready_at: now,
        };

        debug!(
            "📥 Enqueued job: strategy={} priority={} drift={}bps",
            queued.job.strategy_id, queued.job.priority, queued.job.drift_bps
        );

        let mut heap = self.heap.write().await;
        heap.push(queued);

        let mut stats = self.stats.write().await;
        stats.total_enqueued += 1;
        stats.current_depth = heap.len();
    }

    /// 소비 가능한 가장 높은 우선순위 작업 꺼내기
    ///
    /// 백오프 대기 중인 작업은 건너뛰고 힙에 되돌린다.
    pub async fn pop_ready(&self) -> Option<QueuedJob> {
        let now = Utc::now();
        let mut heap = self.heap.write().await;

        let mut deferred = Vec::new();
        let mut found = None;

        while let Some(candidate) = heap.pop() {
            if candidate.is_ready(now) {
                found = Some(candidate);
                break;
            }
            deferred.push(candidate);
        }

        for job in deferred {
            heap.push(job);
        }

        if found.is_some() {
            let mut stats = self.stats.write().await;
            stats.current_depth = heap.len();
        }

        found
    }

    /// 성공/건너뜀으로 끝난 시도 마감
    pub async fn complete(&self, queued: &QueuedJob) {
        debug!(
            "✅ Job done: strategy={} attempt={}",
            queued.job.strategy_id, queued.attempt
        );
        let mut stats = self.stats.write().await;
        stats.total_completed += 1;
    }

    /// 실패한 시도를 백오프와 함께 재예약하거나, 소진 시 채널로 내보낸다
    pub async fn retry_or_exhaust(&self, mut queued: QueuedJob) {
        if queued.attempt >= queued.max_attempts {
            warn!(
                "🚨 Job exhausted after {} attempts: strategy={}",
                queued.attempt, queued.job.strategy_id
            );
            let mut stats = self.stats.write().await;
            stats.total_exhausted += 1;
            // 수신자가 사라졌다면 로그 외에 할 수 있는 것이 없다
            let _ = self.exhausted_tx.send(queued);
            return;
        }

        // 지수 백오프: base * 2^(attempt-1)
        let backoff = self.backoff_base * 2u32.saturating_pow(queued.attempt - 1);
        queued.attempt += 1;
        queued.next_ready_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();

        debug!(
            "🔁 Retrying job: strategy={} attempt={}/{} backoff={:?}",
            queued.job.strategy_id, queued.attempt, queued.max_attempts, backoff
        );

        let mut heap = self.heap.write().await;
        heap.push(queued);

        let mut stats = self.stats.write().await;
        stats.total_retried += 1;
        stats.current_depth = heap.len();
    }

    pub async fn depth(&self) -> usize {
        self.heap.read().await.len()
    }

    pub async fn stats(&self) -> QueueStats {
        let mut stats = self.stats.read().await.clone();
        stats.current_depth = self.heap.read().await.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPriority;
    use alloy::primitives::Address;
    use uuid::Uuid;

    fn job(drift_bps: u32) -> RebalanceJob {
        RebalanceJob {
            strategy_id: Uuid::new_v4(),
            user_address: Address::ZERO,
            chain_id: 1,
            drift_bps,
            priority: JobPriority::from_drift(drift_bps),
        }
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let (queue, _rx) = RebalanceQueue::new(3, Duration::from_secs(2));

        let low = job(600);
        let high = job(2_000);
        let medium = job(900);

        queue.enqueue(low.clone()).await;
        queue.enqueue(high.clone()).await;
        queue.enqueue(medium.clone()).await;

        assert_eq!(queue.pop_ready().await.unwrap().job.priority, JobPriority::High);
        assert_eq!(queue.pop_ready().await.unwrap().job.priority, JobPriority::Medium);
        assert_eq!(queue.pop_ready().await.unwrap().job.priority, JobPriority::Low);
        assert!(queue.pop_ready().await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_same_priority() {
        let (queue, _rx) = RebalanceQueue::new(3, Duration::from_secs(2));

        let first = job(600);
        queue.enqueue(first.clone()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.enqueue(job(600)).await;

        assert_eq!(queue.pop_ready().await.unwrap().job.strategy_id, first.strategy_id);
    }

    #[tokio::test]
    async fn test_retry_applies_backoff() {
        let (queue, _rx) = RebalanceQueue::new(3, Duration::from_millis(50));

        queue.enqueue(job(2_000)).await;
        let queued = queue.pop_ready().await.unwrap();
        queue.retry_or_exhaust(queued).await;

        // 백오프가 끝나기 전에는 소비 불가
        assert!(queue.pop_ready().await.is_none());
        assert_eq!(queue.depth().await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let retried = queue.pop_ready().await.unwrap();
        assert_eq!(retried.attempt, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_emits_on_channel() {
        let (queue, mut rx) = RebalanceQueue::new(2, Duration::from_millis(10));

        queue.enqueue(job(2_000)).await;

        // 1차 시도 실패 -> 재시도 예약
        let first = queue.pop_ready().await.unwrap();
        queue.retry_or_exhaust(first).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 2차 시도 실패 -> 소진
        let second = queue.pop_ready().await.unwrap();
        assert_eq!(second.attempt, 2);
        queue.retry_or_exhaust(second).await;

        let exhausted = rx.recv().await.unwrap();
        assert_eq!(exhausted.attempt, 2);

        let stats = queue.stats().await;
        assert_eq!(stats.total_exhausted, 1);
        assert_eq!(stats.total_retried, 1);
    }
}
