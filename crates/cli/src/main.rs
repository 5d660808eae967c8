use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use previews_api::{config::parse_deployers, render, AllowList, CommandData, CommandResult, Orchestrator, OrchestratorConfig};
use previews_core::PrNumber;
use previews_ops::{ClusterGateway, KubeGateway};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "previewctl", version, about = "PR preview environments")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Repository checkout holding service manifests
    #[arg(long = "repo", global = true, env = "PREVIEWS_REPO_ROOT")]
    repo: Option<PathBuf>,

    /// Comma separated actors allowed to preview and clean up
    #[arg(long = "deployers", global = true, env = "PREVIEWS_DEPLOYERS")]
    deployers: Option<String>,

    /// Explicit kubeconfig (default: in-cluster, then ~/.kube/config)
    #[arg(long = "kubeconfig", global = true, env = "PREVIEWS_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Upper bound for a single command
    #[arg(long = "timeout-secs", global = true, env = "PREVIEWS_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a slash command as if it was posted on a PR
    Run {
        /// Identity of the commenter
        #[arg(long = "actor")]
        actor: String,
        /// Pull request number
        #[arg(long = "pr")]
        pr: PrNumber,
        /// Block until the readiness wait started by `/preview` finishes
        #[arg(long = "wait", action = ArgAction::SetTrue)]
        wait: bool,
        /// Command text, e.g. "/preview ai/open-webui"
        text: String,
    },
    /// Check cluster connectivity and print counts
    Info,
    /// List preview namespaces
    Ls {
        /// Only namespaces of this PR
        #[arg(long = "pr")]
        pr: Option<PrNumber>,
    },
    /// Parse a manifest file and show what would be applied
    Ingest {
        path: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("PREVIEWS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PREVIEWS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PREVIEWS_METRICS_ADDR; expected host:port");
        }
    }
}

fn config_from(cli: &Cli) -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::from_env();
    if let Some(repo) = &cli.repo {
        cfg.repo_root = repo.clone();
    }
    if let Some(d) = &cli.deployers {
        cfg.deployers = parse_deployers(d);
    }
    cfg
}

fn print_result(output: Output, result: &CommandResult) -> Result<()> {
    match output {
        Output::Human => print!("{}", result.content),
        Output::Json => println!("{}", serde_json::to_string_pretty(result)?),
    }
    Ok(())
}

async fn with_deadline<T>(secs: u64, fut: impl std::future::Future<Output = T>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| anyhow!("command did not finish within {}s", secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let kubeconfig = cli.kubeconfig.as_deref();

    match &cli.command {
        Commands::Run { actor, pr, wait, text } => {
            let gateway: Arc<dyn ClusterGateway> = Arc::new(KubeGateway::connect(kubeconfig).await?);
            let cfg = config_from(&cli);
            let policy = Arc::new(AllowList::new(cfg.deployers.clone()));
            let orch = Orchestrator::new(gateway, policy, cfg);
            info!(actor = %actor, pr, text = %text, "run invoked");

            let result = render::attach_markdown(with_deadline(cli.timeout_secs, orch.handle_text(text, actor, *pr)).await?);
            print_result(cli.output, &result)?;

            if let (true, CommandData::Preview(p)) = (*wait, &result.data) {
                let state = tokio::select! {
                    s = orch.readiness().wait(&p.namespace) => s,
                    _ = signal::ctrl_c() => {
                        orch.readiness().cancel(&p.namespace);
                        warn!(namespace = %p.namespace, "interrupted; readiness wait cancelled");
                        None
                    }
                };
                match (cli.output, state) {
                    (Output::Json, Some(s)) => println!("{}", serde_json::to_string_pretty(&s)?),
                    (Output::Human, Some(s)) => println!("readiness: {:?}", s),
                    (_, None) => println!("readiness: unknown"),
                }
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Info => {
            let gateway: Arc<dyn ClusterGateway> = Arc::new(KubeGateway::connect(kubeconfig).await?);
            let orch = Orchestrator::new(gateway, Arc::new(AllowList::default()), config_from(&cli));
            let result = render::attach_markdown(with_deadline(cli.timeout_secs, orch.test_connection()).await?);
            print_result(cli.output, &result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Ls { pr } => {
            let gateway = KubeGateway::connect(kubeconfig).await?;
            let list = match pr {
                Some(pr) => with_deadline(cli.timeout_secs, gateway.preview_namespaces_for_pr(*pr)).await??,
                None => with_deadline(cli.timeout_secs, gateway.list_preview_namespaces()).await??,
            };
            info!(count = list.len(), pr = ?pr, "ls done");
            match cli.output {
                Output::Human => {
                    for ns in &list {
                        println!(
                            "{} • PR #{} • {} • {}",
                            ns.name,
                            ns.pr,
                            ns.target,
                            ns.created_at.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&list)?),
            }
        }
        Commands::Ingest { path } => {
            let set = previews_apply::parse_file(path).with_context(|| format!("ingesting {}", path.display()))?;
            match cli.output {
                Output::Human => {
                    for r in set.resources() {
                        println!("{}", r);
                    }
                    for s in &set.skipped {
                        println!("skipped #{} {} ({:?})", s.index, s.kind.as_deref().unwrap_or("?"), s.reason);
                    }
                }
                Output::Json => {
                    let v = serde_json::json!({ "resources": set.resources(), "skipped": set.skipped });
                    println!("{}", serde_json::to_string_pretty(&v)?);
                }
            }
        }
    }
    Ok(())
}
