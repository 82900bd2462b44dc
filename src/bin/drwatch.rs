//! DRWATCH Daemon
//!
//! Runs health and replication monitoring for a region pair and fails over
//! automatically when the primary goes down.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use drwatch::disaster_recovery::{LeaseLock, LocalLeaseLock};
use drwatch::probe::{ServiceProbe, TcpProbe, TcpReplicationProbe};
use drwatch::storage::Clock;
use drwatch::{
    AlertDispatcher, DrConfig, DrContext, DrService, FailoverOrchestrator, FailoverSwitches,
    HealthChecker, LogChannel, MemoryStatusStore, Metrics, RegionRoles, ReplicationMonitor,
    SystemClock,
};

/// DRWATCH - Two-region disaster recovery watchdog
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one health and one replication cycle, print the status and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Monitor and alert only, never fail over automatically
    #[arg(long, default_value_t = false)]
    no_auto_failover: bool,
}

fn health_probes(config: &DrConfig) -> Vec<Arc<dyn ServiceProbe>> {
    let mut probes: BTreeMap<String, TcpProbe> = BTreeMap::new();
    for region in [&config.primary, &config.secondary] {
        for service in &region.services {
            let probe = probes
                .remove(&service.name)
                .unwrap_or_else(|| TcpProbe::new(service.name.clone(), config.probe_timeout()));
            let probe = match &service.endpoint {
                Some(addr) => probe.with_endpoint(region.name.clone(), addr.clone()),
                None => {
                    warn!(
                        region = %region.name,
                        service = %service.name,
                        "No endpoint configured, service will report unhealthy"
                    );
                    probe
                }
            };
            probes.insert(service.name.clone(), probe);
        }
    }
    probes
        .into_values()
        .map(|p| Arc::new(p) as Arc<dyn ServiceProbe>)
        .collect()
}

fn replication_probe(config: &DrConfig) -> Arc<TcpReplicationProbe> {
    let probe = config
        .replication
        .services
        .iter()
        .fold(TcpReplicationProbe::new(config.probe_timeout()), |probe, s| {
            probe.with_targets(s.service, s.targets.clone())
        });
    Arc::new(probe)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("drwatch=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DrConfig::from_toml_file(path)?,
        None => DrConfig::default(),
    };
    if args.no_auto_failover {
        config = config.manual_only();
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MemoryStatusStore::with_clock(clock.clone());
    let metrics = Arc::new(Metrics::new());
    let alerts = Arc::new(
        AlertDispatcher::new(config.alert_delivery_attempts, config.alert_history_size)
            .with_channel(Arc::new(LogChannel))
            .with_metrics(metrics.clone())
            .with_delivery_timeout(config.alert_delivery_timeout()),
    );

    let roles = RegionRoles::from_config(&config);
    let switches = FailoverSwitches::from_hooks(&config.hooks);
    let probes = health_probes(&config);
    let replication_probe = replication_probe(&config);
    let replicated: Vec<_> = config.replication.services.iter().map(|s| s.service).collect();

    let ctx = DrContext::new(
        config,
        Arc::new(store.clone()),
        clock.clone(),
        alerts,
        metrics.clone(),
    );

    let mut health = HealthChecker::new(ctx.clone(), roles.clone());
    for probe in probes {
        health.register(probe);
    }
    let mut replication = ReplicationMonitor::new(ctx.clone());
    for service in replicated {
        replication.register(service, replication_probe.clone());
    }

    let lock: Arc<dyn LeaseLock> = Arc::new(LocalLeaseLock::new(clock));
    let orchestrator = Arc::new(FailoverOrchestrator::new(
        ctx.clone(),
        roles.clone(),
        switches,
        lock,
    ));
    let service = DrService::new(ctx.clone(), roles, health, replication, orchestrator)
        .with_ttl_sweep(store);

    if args.once {
        let report = service.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        info!("{}", metrics.summary());
        return Ok(());
    }

    info!(
        primary = %ctx.config.primary.name,
        secondary = %ctx.config.secondary.name,
        rto_minutes = ctx.config.rto_target_minutes,
        rpo_minutes = ctx.config.rpo_target_minutes,
        "Starting DRWATCH"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    Arc::new(service).run(shutdown).await;
    info!("{}", metrics.summary());

    Ok(())
}
