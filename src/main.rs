use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, Command};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_rebalancer::adapters::AdapterFactory;
use folio_rebalancer::aggregator::QuoteAggregator;
use folio_rebalancer::chain::{ChainClient, HttpChainClient};
use folio_rebalancer::config::Config;
use folio_rebalancer::evaluator::StrategyEvaluator;
use folio_rebalancer::executor::RebalanceExecutor;
use folio_rebalancer::gas::GasOracle;
use folio_rebalancer::mev::MevProtection;
use folio_rebalancer::notify::{LogNotifier, NotificationSink};
use folio_rebalancer::queue::RebalanceQueue;
use folio_rebalancer::scheduler::{spawn_exhaustion_listener, Scheduler};
use folio_rebalancer::storage::{InMemoryStore, StrategyStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let matches = Command::new("rebalancer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🦀 온체인 포트폴리오 자동 리밸런싱 엔진")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("설정 파일 경로")
                .default_value("config/default.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("로그 레벨 (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .arg(
            Arg::new("simulation")
                .long("simulation")
                .help("시뮬레이션 모드 (트랜잭션을 브로드캐스트하지 않음)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = matches.get_one::<String>("log-level").map(String::as_str).unwrap_or("info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/default.toml");
    let mut config = Config::load(config_path)?;

    if matches.get_flag("simulation") {
        warn!("🧪 Simulation mode enabled - transactions will not be broadcast");
        config.engine.simulation_mode = true;
    }
    let config = Arc::new(config);

    // 체인 클라이언트
    let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
    for chain in &config.chains {
        let client = HttpChainClient::new(
            chain.chain_id,
            chain.rpc_url.clone(),
            chain.price_endpoint.clone(),
            config.quotes.timeout_secs,
        )?;
        clients.insert(chain.chain_id, Arc::new(client));
    }

    // 스토어와 파이프라인 구성요소
    let store: Arc<dyn StrategyStore> = Arc::new(InMemoryStore::new());
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);

    let factory = Arc::new(AdapterFactory::new(&config.quotes));
    let aggregator = Arc::new(QuoteAggregator::new(Arc::clone(&factory), config.quotes.clone()));
    let evaluator = Arc::new(StrategyEvaluator::new(
        clients.clone(),
        config.engine.default_drift_threshold_bps,
    ));
    let gas_oracle = Arc::new(GasOracle::new(
        clients.clone(),
        Arc::clone(&store),
        config.gas.clone(),
    ));
    let mev = Arc::new(MevProtection::new(config.mev.clone()));

    let (queue, exhausted_rx) = RebalanceQueue::new(
        config.queue.max_attempts,
        std::time::Duration::from_secs(config.queue.backoff_base_secs),
    );
    let queue = Arc::new(queue);

    let executor = Arc::new(RebalanceExecutor::new(
        Arc::clone(&store),
        clients,
        Arc::clone(&evaluator),
        aggregator,
        Arc::clone(&gas_oracle),
        mev,
        notifier,
        Arc::clone(&config),
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        evaluator,
        Arc::clone(&queue),
        config.scheduler.clone(),
    ));

    // 백그라운드 태스크 기동
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    tasks.push(Arc::clone(&scheduler).spawn(shutdown_rx.clone()));
    tasks.push(scheduler.spawn_health_check(shutdown_rx.clone()));
    tasks.push(gas_oracle.spawn_sampler(shutdown_rx.clone()));
    tasks.push(spawn_exhaustion_listener(exhausted_rx, shutdown_rx.clone()));
    tasks.extend(executor.spawn_workers(
        Arc::clone(&queue),
        config.queue.consumers,
        shutdown_rx,
    ));

    info!("🚀 Rebalancing engine started ({} chains)", config.chains.len());

    match signal::ctrl_c().await {
        Ok(()) => warn!("🛑 Shutdown signal received, stopping..."),
        Err(e) => error!("❌ Failed to listen for shutdown signal: {}", e),
    }

    // 모든 태스크에 종료 신호 전파 후 대기
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    info!("📈 Venue metrics: {}", factory.metrics_summary());
    info!("✅ Rebalancing engine stopped cleanly");
    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════════╗
    ║                                                          ║
    ║  🦀 Folio Rebalancer v{}                              ║
    ║                                                          ║
    ║  온체인 포트폴리오 자동 리밸런싱 엔진                    ║
    ║                                                          ║
    ║  ⏰ 주기 스케줄러 → 📥 우선순위 큐 → ⚙️ 실행 파이프라인  ║
    ║  🔍 멀티 벤더 견적 집계 · ⛽ 가스 오라클 · 🛡️ MEV 보호   ║
    ║                                                          ║
    ╚══════════════════════════════════════════════════════════╝
    "#,
        env!("CARGO_PKG_VERSION")
    );
}
