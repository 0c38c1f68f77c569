#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Launcher for the global mirror: watches mirrored Services and
//! EndpointSlices and keeps the global aggregator resources converged.

use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use linkerd_global_mirror_k8s_api as k8s;
use linkerd_global_mirror_k8s_index::{EndpointSliceReconciler, Index, ServiceReconciler};
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

/// How often tracked resources are replayed through the reconcilers.
const RESYNC_PERIOD: Duration = Duration::from_secs(90);

#[derive(Debug, Parser)]
#[clap(
    name = "global-mirror",
    about = "Aggregates mirrored services across clusters"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "linkerd=info,warn",
        env = "LINKERD_GLOBAL_MIRROR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace in which global mirror resources are created.
    #[clap(long, default_value = "default")]
    global_mirror_namespace: String,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            global_mirror_namespace,
        } = self;

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let (service_tx, service_rx) = mpsc::unbounded_channel();
        let (slice_tx, slice_rx) = mpsc::unbounded_channel();
        let index = Index::shared(service_tx, slice_tx);

        // Watch both mirrored resource kinds. Relevance is decided by the
        // index's label filter, not by a server-side selector.
        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), slices).instrument(info_span!("endpointslices")),
        );

        tokio::spawn(Index::run(index, RESYNC_PERIOD).instrument(info_span!("resync")));

        let client = runtime.client();
        let services = ServiceReconciler::new(
            client.clone(),
            global_mirror_namespace.clone(),
            service_rx,
        );
        tokio::spawn(services.run().instrument(info_span!("service_reconciler")));

        let slices = EndpointSliceReconciler::new(client, global_mirror_namespace, slice_rx);
        tokio::spawn(slices.run().instrument(info_span!("endpointslice_reconciler")));

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
