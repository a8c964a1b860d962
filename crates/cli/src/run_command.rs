use std::path::Path;

use {
    anyhow::{Result, bail},
    postrelay_config::{RelayConfig, validate},
    postrelay_metrics::{MetricsRecorderConfig, init_metrics},
    postrelay_store::SqliteTargetStore,
    tracing::{debug, info, warn},
};

use crate::config_commands::print_diagnostics;

/// Start polling and forwarding until interrupted.
pub async fn run(config_path: Option<&Path>, config: RelayConfig) -> Result<()> {
    let result = validate::validate(config_path);
    if result.has_errors() {
        print_diagnostics(&result, false);
        bail!("invalid configuration; run `postrelay config check` for details");
    }
    if !config.telegram.has_token() {
        bail!("telegram.token is not set");
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config.metrics.labels.clone().into_iter().collect(),
        listen: config.metrics.listen,
    })?;

    let store = SqliteTargetStore::connect(&config.store.database_url).await?;
    let handle = postrelay_telegram::start(&config.telegram, &config.forward, store).await?;
    let cancel = handle.cancel_token();
    let mut polling = std::pin::pin!(handle.join());

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            false
        },
        () = &mut polling => true,
    };
    if finished {
        warn!("telegram polling ended");
    } else {
        info!("shutting down");
        cancel.cancel();
        polling.await;
    }

    if config.metrics.enabled {
        debug!(metrics = %metrics.render(), "final metrics");
    }
    Ok(())
}
