use clap::Parser;
use notifyd::config::Settings;
use notifyd::dispatch::{Dispatcher, GroupFlush};
use notifyd::inhibit::Inhibitor;
use notifyd::matcher::Matchers;
use notifyd::mute::Muter;
use notifyd::nflog::{InMemoryGossip, Log};
use notifyd::notify::{GossipSettle, NotifyPipeline, NullNotifier};
use notifyd::provider::{Provider, ProviderCallback};
use notifyd::route::{GroupBy, Route, RouteConfig, RouteTree};
use notifyd::silence::Silencer;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// notifyd: groups, deduplicates, and dispatches alerts to receivers.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Duration an unresolved alert may go un-refreshed before it is treated
    /// as auto-resolved.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    resolve_timeout: Duration,

    /// Default wait before a newly-created aggregation group's first flush.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    group_wait: Duration,

    /// Default delay between repeated flushes of a group with new alerts.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    group_interval: Duration,

    /// Default minimum delay before re-sending an unchanged notification.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "4h")]
    repeat_interval: Duration,

    /// This replica's 0-indexed position among peers, used to stagger sends.
    #[arg(long, default_value_t = 0)]
    peer_position: usize,

    /// Total number of replicas participating in gossip dedup.
    #[arg(long, default_value_t = 1)]
    peer_count: usize,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_settings(args: &Args) -> Result<Arc<Settings>, String> {
    let settings = Settings {
        resolve_timeout: args.resolve_timeout,
        default_group_wait: args.group_wait,
        default_group_interval: args.group_interval,
        default_repeat_interval: args.repeat_interval,
        peer_position: args.peer_position,
        peer_count: args.peer_count,
        ..Settings::default()
    };
    settings.validate()?;
    Ok(Arc::new(settings))
}

/// A route tree with a single catch-all node to the "default" receiver.
/// Real deployments load this from a routing config file; wiring that
/// loader is out of scope here (spec Non-goals).
fn default_route_tree(settings: &Settings) -> RouteTree {
    let root = Route {
        matchers: Matchers::default(),
        config: RouteConfig {
            receiver: "default".to_string(),
            group_by: GroupBy::Labels(vec!["alertname".to_string()]),
            group_wait: None,
            group_interval: None,
            repeat_interval: None,
        },
        continue_matching: false,
        children: Vec::new(),
    };
    RouteTree::new(root, settings.clone())
}

async fn run(args: Args) -> Result<(), String> {
    let settings = build_settings(&args)?;

    let inhibitor = Arc::new(Inhibitor::new(vec![]));
    let provider = Provider::with_callback(Arc::clone(&settings), Arc::clone(&inhibitor) as Arc<dyn ProviderCallback>);
    provider.spawn_gc();

    let route_tree = Arc::new(default_route_tree(&settings));
    let (flush_tx, mut flush_rx) = tokio::sync::mpsc::channel::<GroupFlush>(256);
    let dispatcher = Dispatcher::new(route_tree, flush_tx);
    dispatcher.run(provider.subscribe());

    let muter = Arc::new(Muter::new(Arc::new(Silencer::new()), inhibitor));
    let pipeline = Arc::new(NotifyPipeline {
        settings: Arc::clone(&settings),
        muter,
        nflog: Arc::new(Log::new()),
        gossip: Arc::new(InMemoryGossip::new()),
        notifier: Arc::new(NullNotifier::new("default")),
        gossip_settle: Arc::new(GossipSettle::new(settings.gossip_settle_timeout)),
        cancel: CancellationToken::new(),
    });

    let shutdown = CancellationToken::new();
    let flush_shutdown = shutdown.clone();
    let flush_task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move {
            loop {
                tokio::select! {
                    flush = flush_rx.recv() => match flush {
                        Some(flush) => {
                            if let Err(e) = pipeline.run(flush).await {
                                error!(error = %e, "notification pipeline failed");
                            }
                        }
                        None => break,
                    },
                    _ = flush_shutdown.cancelled() => break,
                }
            }
        }
    });

    info!("notifyd started");
    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    info!("shutdown signal received");

    shutdown.cancel();
    dispatcher.close();
    provider.close();
    let _ = flush_task.await;

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}

