//! `urlguard` command line client.
//!
//! Thin shell over the client library: every subcommand builds the service
//! selected by configuration and drives the same widgets the dashboard uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use urlguard_client::config::{
    ENV_ADMIN_KEY, ENV_BASE_URL, ENV_REQUEST_TIMEOUT, ENV_USE_FIXTURES,
};
use urlguard_client::{
    AnalysisApi, ClientConfig, GovernanceMonitor, OverrideWorkflow, PollSnapshot, ScanController,
    ScanPhase, ThreatFeeds, build_api,
};
use urlguard_model::BatchVerdict;

#[derive(Parser, Debug)]
#[command(name = "urlguard")]
#[command(about = "Client for the urlguard URL-analysis service")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

/// Flags take precedence over `URLGUARD_*` variables and `.env`.
#[derive(ClapArgs, Debug, Clone, Default)]
struct ConnectionArgs {
    /// Base URL of the analysis service
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Operator key for privileged calls
    #[arg(long, global = true)]
    admin_key: Option<String>,

    /// Serve every call from built-in fixtures
    #[arg(long, global = true)]
    fixtures: bool,

    /// Per-request timeout, e.g. `10s`
    #[arg(long, global = true)]
    timeout: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a single URL
    Scan { url: String },
    /// Analyse up to 50 URLs in one request
    Batch {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Show governance status and override budget
    Status,
    /// Lift a governance freeze (privileged)
    Unfreeze {
        /// Incident ticket recorded with the override
        #[arg(long)]
        ticket: Option<String>,
    },
    /// Run every poller and log snapshot changes until Ctrl-C
    Watch,
    /// Check service health
    Health,
    /// List a sample of trusted domains
    Trusted,
    /// Show aggregate explanation telemetry
    Telemetry,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,urlguard_client=info,urlguard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.connection)?;
    let api = build_api(&config).context("failed to initialise the analysis client")?;

    match cli.command {
        Command::Scan { url } => scan(api, &url).await,
        Command::Batch { urls } => batch(api.as_ref(), &urls).await,
        Command::Status => status(api, &config).await,
        Command::Unfreeze { ticket } => unfreeze(api, &config, ticket).await,
        Command::Watch => watch_all(api, &config).await,
        Command::Health => health(api.as_ref()).await,
        Command::Trusted => trusted(api.as_ref()).await,
        Command::Telemetry => telemetry(api.as_ref()).await,
    }
}

fn load_config(args: &ConnectionArgs) -> anyhow::Result<ClientConfig> {
    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "loaded .env file");
    }

    let mut overrides: HashMap<&str, String> = HashMap::new();
    if let Some(url) = &args.api_url {
        overrides.insert(ENV_BASE_URL, url.clone());
    }
    if let Some(key) = &args.admin_key {
        overrides.insert(ENV_ADMIN_KEY, key.clone());
    }
    if args.fixtures {
        overrides.insert(ENV_USE_FIXTURES, "true".to_string());
    }
    if let Some(timeout) = &args.timeout {
        overrides.insert(ENV_REQUEST_TIMEOUT, timeout.clone());
    }

    ClientConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })
    .context("invalid client configuration")
}

async fn scan(api: Arc<dyn AnalysisApi>, url: &str) -> anyhow::Result<()> {
    let widget = ScanController::new(api);
    let state = widget.submit(url).await?;

    match (state.phase, &state.result) {
        (phase, Some(result)) if phase.is_verdict() => {
            println!("{}  {}", result.verdict, result.url);
            println!("  risk score: {:.1}", result.risk_score);
            println!("  trusted:    {}", result.is_trusted_domain);
            if !result.risk_level.is_empty() {
                println!("  risk level: {}", result.risk_level);
            }
            if !result.explanation.summary.is_empty() {
                println!("  {}", result.explanation.summary);
            }
            for signal in &result.explanation.risk {
                println!("  - {signal}");
            }
            for signal in &result.explanation.positive {
                println!("  + {signal}");
            }
            for warning in &result.warnings {
                println!("  ! {warning}");
            }
            Ok(())
        }
        (ScanPhase::Frozen | ScanPhase::Failed, _) => Err(anyhow!(
            state
                .error
                .unwrap_or_else(|| "scan did not complete".to_string())
        )),
        (phase, _) => bail!("scan ended in unexpected state {phase:?}"),
    }
}

async fn batch(api: &dyn AnalysisApi, urls: &[String]) -> anyhow::Result<()> {
    let response = api
        .batch_scan(urls)
        .await
        .map_err(|err| anyhow!(err.describe()))?;

    for entry in &response.results {
        match entry.verdict {
            BatchVerdict::Scored(verdict) => println!(
                "{:<10} {:>5.1}  {}",
                verdict.as_wire(),
                entry.risk_score.unwrap_or_default(),
                entry.url
            ),
            BatchVerdict::Error => println!(
                "{:<10} {:>5}  {}  ({})",
                "ERROR",
                "-",
                entry.url,
                entry.error.as_deref().unwrap_or("analysis failed")
            ),
        }
    }
    println!(
        "total {}  safe {}  suspicious {}  phishing {}  failed {}",
        response.total,
        response.safe_count,
        response.suspicious_count,
        response.phishing_count,
        response.failed().count()
    );
    Ok(())
}

async fn status(api: Arc<dyn AnalysisApi>, config: &ClientConfig) -> anyhow::Result<()> {
    let monitor = GovernanceMonitor::new(api, config.polling.governance);
    let status = monitor
        .refresh()
        .await
        .map_err(|err| anyhow!(err.describe()))?;

    if status.is_frozen {
        println!("FROZEN");
        println!(
            "  reason:   {}",
            status.freeze_reason.as_deref().unwrap_or("unknown")
        );
        println!(
            "  since:    {}",
            status.frozen_at.as_deref().unwrap_or("unknown")
        );
        println!(
            "  by:       {}",
            status.frozen_by.as_deref().unwrap_or("unknown")
        );
        println!(
            "  incident: {}",
            status.incident_id.as_deref().unwrap_or("none")
        );
    } else {
        println!("ACTIVE");
    }

    let budget = &status.budget;
    println!(
        "overrides: {}/{} this hour ({:.0}%){}",
        budget.override_count_hourly,
        budget.max_overrides_per_hour,
        budget.budget_percentage(),
        if budget.budget_exhausted {
            ", budget exhausted"
        } else {
            ""
        }
    );
    println!(
        "pipeline: {}  model: {}",
        if status.health.pipeline_ready {
            "ready"
        } else {
            "not ready"
        },
        status.health.model_type
    );
    Ok(())
}

async fn unfreeze(
    api: Arc<dyn AnalysisApi>,
    config: &ClientConfig,
    ticket: Option<String>,
) -> anyhow::Result<()> {
    if config.admin_key.is_none() && !config.use_fixtures {
        warn!("no admin key configured; the override will likely be refused");
    }

    let monitor = GovernanceMonitor::new(Arc::clone(&api), config.polling.governance);
    let workflow = OverrideWorkflow::new(api, Arc::clone(&monitor));
    let response = workflow
        .unfreeze(ticket)
        .await
        .map_err(|err| anyhow!(err.describe()))?;

    println!(
        "{}",
        response
            .message
            .unwrap_or_else(|| "Override applied".to_string())
    );
    if let Some(status) = monitor.latest() {
        println!("frozen: {}", status.is_frozen);
    }
    Ok(())
}

async fn watch_all(
    api: Arc<dyn AnalysisApi>,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let monitor = GovernanceMonitor::new(Arc::clone(&api), config.polling.governance);
    let feeds = ThreatFeeds::new(&api, &config.polling);

    let mut governance = monitor.subscribe();
    let mut live = feeds.live.subscribe();
    let mut map = feeds.map.subscribe();
    let mut regions = feeds.regions.subscribe();

    let mut handles = vec![monitor.start()];
    handles.extend(feeds.start_all());
    info!(pollers = handles.len(), "watching; press Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = governance.changed() => {
                changed?;
                let snapshot = governance.borrow_and_update().clone();
                log_snapshot("governance", &snapshot, |status| {
                    format!(
                        "frozen={} overrides={}/{}",
                        status.is_frozen,
                        status.budget.override_count_hourly,
                        status.budget.max_overrides_per_hour
                    )
                });
            }
            changed = live.changed() => {
                changed?;
                let snapshot = live.borrow_and_update().clone();
                log_snapshot("live_feed", &snapshot, |threats| {
                    threats
                        .first()
                        .map(|latest| {
                            format!(
                                "{} rows, latest {} at {}",
                                threats.len(),
                                latest.label,
                                latest.location
                            )
                        })
                        .unwrap_or_else(|| "no threats".to_string())
                });
            }
            changed = map.changed() => {
                changed?;
                let snapshot = map.borrow_and_update().clone();
                log_snapshot("threat_map", &snapshot, |points| {
                    let valid = points
                        .iter()
                        .filter(|point| point.has_valid_coordinates())
                        .count();
                    format!("{} points ({valid} plottable)", points.len())
                });
            }
            changed = regions.changed() => {
                changed?;
                let snapshot = regions.borrow_and_update().clone();
                log_snapshot("regions", &snapshot, |regions| {
                    regions
                        .iter()
                        .map(|region| format!("{}={}", region.region, region.count))
                        .collect::<Vec<_>>()
                        .join(" ")
                });
            }
        }
    }

    for handle in handles {
        handle.stop();
    }
    // let the loops see the stop signal before the runtime shuts down
    tokio::time::sleep(Duration::from_millis(10)).await;
    info!("stopped");
    Ok(())
}

fn log_snapshot<T>(
    name: &str,
    snapshot: &PollSnapshot<T>,
    summary: impl Fn(&T) -> String,
) {
    if snapshot.is_fetching {
        return;
    }
    match (snapshot.data(), &snapshot.last_error) {
        (Some(data), Some(err)) if snapshot.is_error => {
            warn!(resource = name, error = %err, "showing stale data: {}", summary(data));
        }
        (None, Some(err)) if snapshot.is_error => {
            warn!(resource = name, error = %err, "no data yet");
        }
        (Some(data), _) => info!(resource = name, "{}", summary(data)),
        (None, _) => {}
    }
}

async fn health(api: &dyn AnalysisApi) -> anyhow::Result<()> {
    let health = api.health().await.map_err(|err| anyhow!(err.describe()))?;
    println!(
        "{}  pipeline_ready={}  model={}",
        health.status, health.pipeline_ready, health.model_type
    );
    if !health.is_healthy() {
        bail!("analysis service is not healthy");
    }
    Ok(())
}

async fn trusted(api: &dyn AnalysisApi) -> anyhow::Result<()> {
    let trusted = api
        .trusted_domains()
        .await
        .map_err(|err| anyhow!(err.describe()))?;
    for domain in &trusted.sample_trusted_domains {
        println!("{domain}");
    }
    println!(
        "showing {} of {} trusted domains",
        trusted.sample_trusted_domains.len(),
        trusted.total_trusted
    );
    if !trusted.note.is_empty() {
        println!("{}", trusted.note);
    }
    Ok(())
}

async fn telemetry(api: &dyn AnalysisApi) -> anyhow::Result<()> {
    let summary = api
        .telemetry_summary()
        .await
        .map_err(|err| anyhow!(err.describe()))?;
    println!("total scans: {}", summary.total_scans);
    for (verdict, share) in &summary.verdict_distribution {
        println!("  {verdict:<10} {share}");
    }
    println!("incomplete analysis: {}", summary.incomplete_analysis_rate);
    println!("allowlist overrides: {}", summary.allowlist_override_rate);
    println!("risk signals/scan:   {:.2}", summary.avg_risk_signals_per_scan);
    if !summary.top_risk_signals.is_empty() {
        println!("top risk signals: {}", summary.top_risk_signals.join("; "));
    }
    if !summary.top_inconclusive_checks.is_empty() {
        println!(
            "top inconclusive checks: {}",
            summary.top_inconclusive_checks.join("; ")
        );
    }
    if let Some(updated) = summary.collection_period.last_updated_at() {
        println!("last updated: {updated}");
    }
    Ok(())
}
