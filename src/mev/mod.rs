use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::chain::{SubmissionMode, TxRequest};
use crate::config::{MevPreference, MevSettings};

/// 브로드캐스트 전 MEV 완화 변환
///
/// 설정된 선호 전략이 사용 불가하면 다음 전략으로 넘어가고, 마지막에는
/// 항상 랜덤 지연 기본선으로 끝난다. 실행을 무기한 막는 경우는 없다.
pub struct MevProtection {
    settings: MevSettings,
}

impl MevProtection {
    pub fn new(settings: MevSettings) -> Self {
        Self { settings }
    }

    /// 제출 직전의 트랜잭션 요청을 변환한다
    pub async fn protect(&self, mut tx: TxRequest) -> TxRequest {
        // 선호 전략부터 기본선까지의 폴백 사슬
        let chain: &[MevPreference] = match self.settings.preference {
            MevPreference::PrivateRelay => &[
                MevPreference::PrivateRelay,
                MevPreference::Intent,
                MevPreference::RandomDelay,
            ],
            MevPreference::Intent => &[MevPreference::Intent, MevPreference::RandomDelay],
            MevPreference::RandomDelay => &[MevPreference::RandomDelay],
        };

        for strategy in chain {
            match strategy {
                MevPreference::PrivateRelay => {
                    if let Some(relay_url) = &self.settings.relay_url {
                        debug!("🛡️ Routing transaction via private relay");
                        tx.submission = SubmissionMode::PrivateRelay(relay_url.clone());
                        return tx;
                    }
                    warn!("⚠️ Private relay preferred but no relay URL configured, falling back");
                }
                MevPreference::Intent => {
                    if self.settings.intent_enabled {
                        debug!("🛡️ Marking transaction for intent submission");
                        tx.submission = SubmissionMode::Intent;
                        return tx;
                    }
                    warn!("⚠️ Intent submission not enabled, falling back");
                }
                MevPreference::RandomDelay => {
                    let delay_ms = rand::thread_rng().gen_range(0..=self.settings.max_delay_ms);
                    debug!("🛡️ Randomized pre-broadcast delay: {}ms", delay_ms);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    tx.submission = SubmissionMode::Public;
                    return tx;
                }
            }
        }

        tx
    }
}
