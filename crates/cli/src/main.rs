use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use ksync_core::PropertyPath;
use ksync_kubehub::{
    parse_gvk_key, CachedDiscovery, DiscoveryClient, GroupVersionResource, KubeDiscovery, ListWatch, ObjectWatcher,
    RestMapper, RetryError,
};
use ksync_store::{EventSink, Factories, LabelSelector, WatchEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ksyncctl", version, about = "Inspect and wait on cluster objects with the ksync engine")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces for watch, "default" for wait)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List served API groups, or the resources of one group version
    Discover {
        /// Group version, e.g. "v1" or "apps/v1"
        #[arg(long = "gv")]
        gv: Option<String>,
    },
    /// Poll one object until a field exists or equals a value
    Wait {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        /// Object name
        name: String,
        /// Field path, e.g. "status.readyReplicas" or "status.conditions[*].type"
        #[arg(long = "path")]
        path: String,
        /// Expected JSON value at the path
        #[arg(long = "equals")]
        equals: Option<String>,
        /// Give up after this many seconds
        #[arg(long = "timeout", default_value_t = 300)]
        timeout: u64,
    },
    /// Stream change events for a resource
    Watch {
        /// Group/version/resource, e.g. "v1/pods" or "apps/v1/deployments"
        gvr: String,
        /// Only print objects matching this label selector
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; shutting down");
        }
        token.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let client = Client::try_default().await.context("building kube client from the current context")?;

    match cli.command {
        Commands::Discover { gv } => discover(client, gv.as_deref(), cli.output).await,
        Commands::Wait { gvk, name, path, equals, timeout } => {
            let path = PropertyPath::parse(&path).with_context(|| format!("parsing --path {path:?}"))?;
            let equals = equals
                .map(|raw| serde_json::from_str::<Value>(&raw).with_context(|| format!("parsing --equals {raw:?} as JSON")))
                .transpose()?;
            let want = Condition { path, equals };
            wait(client, &gvk, &name, cli.namespace.as_deref(), want, Duration::from_secs(timeout), cli.output).await
        }
        Commands::Watch { gvr, selector } => {
            let gvr = GroupVersionResource::parse(&gvr).with_context(|| format!("parsing resource {gvr:?}"))?;
            let selector = match selector {
                Some(s) => LabelSelector::parse(&s)?,
                None => LabelSelector::everything(),
            };
            watch(client, gvr, cli.namespace.as_deref().unwrap_or(""), selector, cli.output).await
        }
    }
}

async fn discover(client: Client, gv: Option<&str>, output: Output) -> Result<()> {
    let discovery = CachedDiscovery::new(KubeDiscovery::new(client));
    let Some(gv) = gv else {
        let version = discovery.server_version().await.context("fetching server version")?;
        let groups = discovery.server_groups().await.context("listing API groups")?;
        info!(groups = groups.groups.len(), server = %version.git_version, "discover invoked");
        match output {
            Output::Human => {
                println!("server: {}", version.git_version);
                for g in &groups.groups {
                    let name = if g.name.is_empty() { "core" } else { g.name.as_str() };
                    let preferred = g.preferred_version.as_ref().map(|v| v.version.as_str()).unwrap_or("-");
                    let versions: Vec<&str> = g.versions.iter().map(|v| v.version.as_str()).collect();
                    println!("{:<40} {:<10} {}", name, preferred, versions.join(","));
                }
            }
            Output::Json => println!("{}", serde_json::to_string_pretty(&groups)?),
        }
        return Ok(());
    };
    let list = discovery
        .server_resources_for_group_version(gv)
        .await
        .with_context(|| format!("listing resources for {gv}"))?;
    match output {
        Output::Human => {
            println!("{:<40} {:<32} {:<10} VERBS", "NAME", "KIND", "SCOPE");
            for r in &list.resources {
                let scope = if r.namespaced { "namespaced" } else { "cluster" };
                println!("{:<40} {:<32} {:<10} {}", r.name, r.kind, scope, r.verbs.join(","));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&list)?),
    }
    Ok(())
}

/// What `wait` polls for: the path exists, or holds the expected value.
struct Condition {
    path: PropertyPath,
    equals: Option<Value>,
}

impl Condition {
    fn holds(&self, obj: &DynamicObject) -> bool {
        let doc = serde_json::to_value(obj).unwrap_or(Value::Null);
        let found = self.path.select(&doc);
        match &self.equals {
            None => !found.is_empty(),
            Some(want) => found.iter().any(|v| *v == want),
        }
    }
}

async fn wait(
    client: Client,
    gvk: &str,
    name: &str,
    namespace: Option<&str>,
    want: Condition,
    timeout: Duration,
    output: Output,
) -> Result<()> {
    let gvk = parse_gvk_key(gvk)?;
    let mapper = RestMapper::new(Arc::new(CachedDiscovery::new(KubeDiscovery::new(client.clone()))));
    let api = mapper.resource_api(client, &gvk, namespace).await.with_context(|| format!("resolving {}", gvk.kind))?;
    info!(kind = %gvk.kind, name, path = %want.path, timeout_secs = timeout.as_secs(), "wait invoked");

    let watcher = ObjectWatcher::for_object(cancel_on_ctrl_c(), api, name);
    // The object may not exist yet. watch_until ends on the first failed get,
    // so retry_until is used and a 404 stays retryable.
    let found = watcher
        .retry_until(
            |obj, err| match (obj, err) {
                (Some(obj), _) if want.holds(obj) => Ok(()),
                (Some(_), _) => Err(RetryError::retryable(format!("{} not satisfied yet", want.path))),
                (None, Some(kube::Error::Api(resp))) if resp.code == 404 => {
                    Err(RetryError::retryable(format!("{name} not found yet")))
                }
                (None, Some(e)) => Err(RetryError::permanent(e.to_string())),
                (None, None) => Err(RetryError::retryable("no response")),
            },
            timeout,
        )
        .await?;
    let Some(obj) = found else { bail!("{name} disappeared before the condition held") };
    match output {
        Output::Human => println!("{} met {}", object_key(&obj), want.path),
        Output::Json => println!("{}", serde_json::to_string_pretty(&obj)?),
    }
    Ok(())
}

async fn watch(client: Client, gvr: GroupVersionResource, namespace: &str, selector: LabelSelector, output: Output) -> Result<()> {
    info!(gvr = %gvr, ns = %namespace, selector = %selector, "watch invoked");
    let factories = Factories::new();
    let source: Arc<dyn ListWatch> = Arc::new(client);
    let factory = factories.for_namespace(source, namespace);
    let (tx, mut rx) = mpsc::channel::<WatchEvent>(256);
    let cancel = cancel_on_ctrl_c();

    let mut informer = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        res = factory.subscribe(&gvr, Some(EventSink::Blocking(tx))) => res?,
    };
    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => {
                    warn!(gvr = %gvr, "event stream closed");
                    break;
                }
            },
        };
        if !selector.matches_object(&ev.object) {
            continue;
        }
        match output {
            Output::Human => println!(
                "{:<8} {} rv={}",
                ev.event_type,
                object_key(&ev.object),
                ev.object.resource_version().unwrap_or_default()
            ),
            Output::Json => println!("{}", serde_json::to_string(&ev)?),
        }
    }
    informer.close();
    factories.shutdown();
    Ok(())
}

fn object_key(obj: &DynamicObject) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}
