mod cli;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use approval_flow::{
    ApprovalCoordinator, ApprovalPrompt, ApprovalPrompter, PendingRegistry, PromptError,
};
use audit_store::AuditStore;
use gate_policy::{validate_definition, validate_services, ServiceDefinition, ServiceTable};
use http_gate::{build_router, AppState, CaptureConfig, GateState};
use route_guard::{resolves_privately, validate_upstream, GuardPolicy};
use telegram_notify::{Notifier, NotifierConfig, TelegramApi};

use crate::cli::Cli;

/// Prompter used when no chat transport is configured. Every prompt fails
/// to deliver, which collapses the pending approval into a denial; the
/// gateway stays fail-closed rather than fail-open.
struct NoChannelPrompter;

#[async_trait::async_trait]
impl ApprovalPrompter for NoChannelPrompter {
    async fn prompt(&self, _prompt: &ApprovalPrompt) -> Result<(), PromptError> {
        Err(PromptError(
            "no notification channel configured".to_string(),
        ))
    }
}

/// An override must survive the same checks as a configured service before
/// it reaches the live table.
fn check_override(def: &ServiceDefinition, guard: &GuardPolicy) -> Result<()> {
    validate_definition(def)?;
    let base = def.upstream_url()?;
    validate_upstream(guard, &base)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    if let Some(ref listen) = cli.listen {
        cfg.listen_addr = listen.clone();
    }
    if let Some(ref db) = cli.db {
        cfg.audit.db_path = db.clone();
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.listen_addr,
        db = %cfg.audit.db_path.display(),
        services = cfg.services.len(),
        "clawguard starting"
    );

    // 4. Open the audit store.
    let store = AuditStore::open(&cfg.audit.db_path).context("failed to open audit store")?;

    // 5. Validate the bootstrap service table. A configured service that
    //    fails the security policy aborts startup; config bugs should be
    //    loud.
    let guard = GuardPolicy {
        allowed_upstream_hosts: cfg.security.allowed_upstream_hosts.clone(),
        block_private_ips: cfg.security.block_private_ips,
    };
    validate_services(&cfg.services).context("invalid service configuration")?;
    for def in &cfg.services {
        let base = def
            .upstream_url()
            .with_context(|| format!("service '{}' upstream", def.name))?;
        validate_upstream(&guard, &base)
            .with_context(|| format!("service '{}' fails the security policy", def.name))?;
        if cfg.security.dns_check {
            if let Some(host) = base.host_str() {
                // Advisory only; logs a warning when it resolves privately.
                resolves_privately(host).await;
            }
        }
    }
    let bootstrap = cfg.services.clone();
    let services = Arc::new(ServiceTable::new(cfg.services.clone()));

    // 6. Apply persisted service overrides. Unlike config services, a bad
    //    override is skipped with a warning so one stale row cannot keep
    //    the gateway down.
    match store.list_overrides().await {
        Ok(rows) => {
            for row in rows {
                match serde_json::from_str::<ServiceDefinition>(&row.config_json) {
                    Ok(def) => match check_override(&def, &guard) {
                        Ok(()) => {
                            info!(service = %def.name, "service override applied");
                            services.upsert(def);
                        }
                        Err(err) => {
                            warn!(service = %row.service_name, %err, "service override skipped")
                        }
                    },
                    Err(err) => {
                        warn!(service = %row.service_name, %err, "unparseable service override")
                    }
                }
            }
        }
        Err(err) => warn!(%err, "could not load service overrides"),
    }

    // 7. Pending registry and notifier.
    let pending = Arc::new(PendingRegistry::new());
    let (prompter, notifier): (Arc<dyn ApprovalPrompter>, Option<Arc<Notifier>>) =
        match &cfg.telegram {
            Some(telegram) => {
                let api = Arc::new(
                    TelegramApi::new(&telegram.bot_token)
                        .context("failed to build Telegram client")?,
                );
                let notifier = Arc::new(Notifier::new(
                    api,
                    NotifierConfig {
                        chat_id: telegram.chat_id,
                        pairing_enabled: telegram.pairing.enabled,
                        pairing_secret: telegram.pairing.secret.clone(),
                    },
                    Arc::clone(&pending),
                    store.clone(),
                ));
                (
                    Arc::clone(&notifier) as Arc<dyn ApprovalPrompter>,
                    Some(notifier),
                )
            }
            None => {
                warn!("no telegram config; approval-required requests will be denied");
                (Arc::new(NoChannelPrompter), None)
            }
        };

    // 8. Coordinator, then rebuild the live grants from the store.
    let coordinator = Arc::new(ApprovalCoordinator::new(
        Arc::clone(&pending),
        prompter,
        store.clone(),
        Duration::from_secs(cfg.approval.timeout_secs),
    ));
    coordinator
        .hydrate()
        .await
        .context("failed to hydrate approval grants")?;

    // 9. Set up shutdown signal (ctrl_c + SIGTERM).
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (ctrl-c)");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT (ctrl-c)");
        }

        let _ = shutdown_tx_signal.send(());
    });

    // 10. Start the notifier polling loop.
    if let Some(notifier) = notifier {
        tokio::spawn(notifier.run(shutdown_tx.subscribe()));
    }

    // 11. Build the router and serve until the shutdown signal.
    let state = AppState(Arc::new(GateState {
        agent_key: cfg.agent_key.clone(),
        services,
        bootstrap,
        guard,
        coordinator,
        store,
        client: GateState::upstream_client().context("failed to build upstream client")?,
        capture: CaptureConfig {
            enabled: cfg.audit.capture_payloads,
            max_bytes: cfg.audit.max_payload_log_size,
        },
        admin_ip_allowlist: cfg.admin.ip_allowlist.clone(),
        admin_pin: cfg.admin.pin.clone(),
        max_body_bytes: cfg.max_body_bytes,
    }));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;
    info!(listen = %cfg.listen_addr, "gateway listening");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await
    .context("server error")?;

    info!("clawguard shut down cleanly");
    Ok(())
}
