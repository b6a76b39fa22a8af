use thiserror::Error;

/// 리밸런싱 파이프라인 에러 분류
///
/// 실행자는 이 분류에 따라 감사 기록 작성 여부와 재시도 의미를 결정한다.
#[derive(Debug, Error)]
pub enum RebalanceError {
    /// 설정 오류 (위임 없음, 컨트랙트 주소 없음 등) - 재시도해도 이득이 없지만
    /// 일반 큐 정책에 의해 재시도는 일어난다
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 전략 정의 자체가 잘못됨 - 이번 사이클에서 전략을 건너뛴다
    #[error("Validation error: {0}")]
    Validation(String),

    /// 일시적 외부 오류 (어댑터 타임아웃, RPC 순단)
    #[error("Transient external error: {0}")]
    TransientExternal(String),

    /// 경제적 게이트 (가스 과다, 수용 가능한 견적 없음) - 나중 재시도에서 해소 기대
    #[error("Economic gate: {0}")]
    EconomicGate(String),

    /// 온체인 실패 (시뮬레이션 revert, receipt 실패) - 항상 기록하고 사용자에게 노출
    #[error("On-chain failure: {0}")]
    OnChain(String),
}

impl RebalanceError {
    /// 감사 기록 없이 조용히 건너뛰어야 하는 에러인지
    pub fn is_skip(&self) -> bool {
        matches!(self, RebalanceError::Validation(_))
    }

    /// 분류 라벨 (기록/로그용)
    pub fn classification(&self) -> &'static str {
        match self {
            RebalanceError::Configuration(_) => "configuration",
            RebalanceError::Validation(_) => "validation",
            RebalanceError::TransientExternal(_) => "transient",
            RebalanceError::EconomicGate(_) => "economic",
            RebalanceError::OnChain(_) => "onchain",
        }
    }
}
