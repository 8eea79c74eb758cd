use std::sync::Arc;

use anyhow::{Error, Result};
use notification_dispatch::{
    api::{AppState, run_api_server},
    channels::{ChannelRegistry, EmailChannel, PushChannel, RealtimeChannel},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::PgStore,
        email::HttpEmailTransport,
        health::{HealthChecker, HealthProbe},
        queue::RedisJobQueue,
        rbmq::RabbitMqClient,
        redis::{RedisConnection, RedisDedupStore},
    },
    config::Config,
    domain::strategy::StrategyRegistry,
    ports::{JobQueue, NotificationStore},
    service::{NotificationService, ServiceSettings},
    worker::{NotificationWorker, WorkerConfig},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;
    let retry_config = config.retry_config();

    let redis = Arc::new(RedisConnection::new(&config.redis_url, retry_config.clone())?);

    let pg = Arc::new(PgStore::connect(&config.database_url).await?);
    pg.migrate().await?;
    let store: Arc<dyn NotificationStore> = pg.clone();

    let rabbitmq = Arc::new(RabbitMqClient::connect(&config.rabbitmq_url, &config.realtime_exchange).await?);

    let email_breaker = Arc::new(CircuitBreaker::new(
        "email_service",
        redis.clone(),
        config.circuit_breaker_config(),
    ));
    let email_transport = Arc::new(
        HttpEmailTransport::new(
            &config.email_service_url,
            config.email_service_api_key.clone(),
            retry_config,
        )?
        .with_circuit_breaker(email_breaker.clone()),
    );

    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(
        redis.clone(),
        config.queue_name.clone(),
        config.job_options(),
    ));

    let strategies = Arc::new(StrategyRegistry::default());
    let channels = ChannelRegistry::new()
        .with(Arc::new(RealtimeChannel::new(rabbitmq.clone())))
        .with(Arc::new(EmailChannel::new(
            store.clone(),
            email_transport,
            strategies.clone(),
            config.app_base_url.clone(),
        )))
        .with(Arc::new(PushChannel));

    let service = Arc::new(NotificationService::new(
        store,
        Arc::new(RedisDedupStore::new(redis.clone())),
        queue.clone(),
        channels,
        strategies,
        ServiceSettings {
            dedup_ttl: config.dedup_ttl(),
            retention_days: Some(config.notification_retention_days),
        },
    ));

    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        pg as Arc<dyn HealthProbe>,
        redis.clone() as Arc<dyn HealthProbe>,
        rabbitmq as Arc<dyn HealthProbe>,
        email_breaker as Arc<dyn HealthProbe>,
    ];
    let health_checker = HealthChecker::new(probes).with_queue(queue.clone());

    let worker = NotificationWorker::new(
        service.clone(),
        queue.clone(),
        WorkerConfig {
            concurrency: config.worker_concurrency,
            poll_interval: config.worker_poll_interval(),
        },
    );
    worker.start();

    let shutdown = CancellationToken::new();

    let cleaner = {
        let queue = queue.clone();
        let shutdown = shutdown.clone();
        let lock_timeout = config.job_lock_timeout();
        let mut clean_interval = tokio::time::interval(config.queue_clean_interval());
        let mut stalled_interval = tokio::time::interval(config.stalled_check_interval());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = clean_interval.tick() => match queue.clean_old_jobs().await {
                        Ok(removed) if removed > 0 => info!(removed, "Old jobs cleaned"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Queue cleanup failed"),
                    },
                    _ = stalled_interval.tick() => match queue.recover_stalled(lock_timeout).await {
                        Ok(recovered) if recovered > 0 => warn!(recovered, "Stalled jobs recovered"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Stalled job recovery failed"),
                    },
                }
            }
        })
    };

    let state = Arc::new(AppState {
        service,
        queue,
        health_checker,
    });
    let server = tokio::spawn(run_api_server(state, config.server_port, shutdown.clone()));

    info!(port = config.server_port, "Notification dispatch started");

    wait_for_shutdown_signal().await;

    shutdown.cancel();
    worker.stop().await;

    if let Err(e) = cleaner.await {
        warn!(error = %e, "Cleanup task ended abnormally");
    }

    match server.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    redis.shutdown().await;
    info!("Notification dispatch stopped");

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notification_dispatch=info,tower_http=info,lapin=warn".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_target(true))
        .init();
}
