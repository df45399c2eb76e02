use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kview_api::{Console, KviewApi, Selector, TableView};
use kview_apply::Operator;
use kview_core::{DateStyle, OperationType, ResourceKind};
use kview_persist::{HistoryEntry, HistoryFilter, HistoryPage, DEFAULT_PAGE_SIZE};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kviewctl", version, about = "kview CLI: resource tables, apply and history")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all for lists, current context for single objects)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Cluster id history is recorded under (default: current kube context)
    #[arg(long = "cluster", env = "KVIEW_CLUSTER", global = true)]
    cluster: Option<String>,

    #[arg(long = "operator-id", env = "KVIEW_OPERATOR_ID", global = true)]
    operator_id: Option<String>,

    #[arg(long = "operator-name", env = "KVIEW_OPERATOR_NAME", global = true)]
    operator_name: Option<String>,

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
    /// Show the columns a kind's table uses
    Columns {
        /// Kind plural ("deployments"), manifest kind ("Deployment") or CRD name ("widgets.example.com")
        kind: String,
    },
    /// List objects of a kind as a table
    Ls {
        kind: String,
        /// Free-text filter, case-insensitive
        #[arg(long = "query", short = 'q', default_value = "")]
        query: String,
        /// Render dates as RFC 3339 instead of ages
        #[arg(long = "absolute-dates", action = ArgAction::SetTrue)]
        absolute_dates: bool,
    },
    /// Print one object
    Get { kind: String, name: String },
    /// Create or update from a manifest (server-side apply)
    Apply {
        /// Manifest path, or "-" for stdin
        #[arg(short = 'f', long = "filename")]
        file: String,
        /// Validate against this CRD's schema before applying
        #[cfg(feature = "validate")]
        #[arg(long = "validate-crd")]
        validate_crd: Option<String>,
    },
    /// Delete one object
    Delete { kind: String, name: String },
    /// Browse recorded mutations, newest first
    History {
        /// Manifest kind, e.g. "ConfigMap"
        #[arg(long = "kind")]
        kind: Option<String>,
        #[arg(long = "name")]
        name: Option<String>,
        /// create | update | delete | apply
        #[arg(long = "op")]
        op: Option<String>,
        /// Only failed attempts
        #[arg(long = "failed", action = ArgAction::SetTrue, conflicts_with = "succeeded")]
        failed: bool,
        /// Only successful attempts
        #[arg(long = "succeeded", action = ArgAction::SetTrue)]
        succeeded: bool,
        #[arg(long = "page", default_value_t = 1)]
        page: u32,
        #[arg(long = "page-size", default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },
    /// Show one history entry with its manifests
    HistoryShow { id: String },
}

fn init_tracing() {
    let env = std::env::var("KVIEW_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KVIEW_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KVIEW_METRICS_ADDR; expected host:port");
        }
    }
}

fn operator(cli: &Cli) -> Operator {
    let fallback = Operator::from_env();
    Operator::new(
        cli.operator_id.clone().unwrap_or(fallback.id),
        cli.operator_name.clone().unwrap_or(fallback.name),
    )
}

fn read_manifest(file: &str) -> Result<String> {
    if file == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).context("reading manifest from stdin")?;
        Ok(s)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading manifest {}", file))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let console = Console::connect(cli.cluster.clone(), operator(&cli)).await?;
    let ns = cli.namespace.as_deref();

    match &cli.command {
        Commands::Columns { kind } => {
            let cols = console.columns(&ResourceKind::parse(kind)).await?;
            match cli.output {
                Output::Human => {
                    let rows: Vec<Vec<String>> = cols
                        .iter()
                        .map(|c| vec![c.id.clone(), c.header.clone(), c.field_path.clone(), format!("{:?}", c.value_type)])
                        .collect();
                    print_table(&["ID", "HEADER", "PATH", "TYPE"], &rows);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&cols)?),
            }
        }
        Commands::Ls { kind, query, absolute_dates } => {
            let kind = ResourceKind::parse(kind);
            info!(kind = %kind, ns = ?ns, query = %query, "ls invoked");
            let dates = if *absolute_dates { DateStyle::Absolute } else { DateStyle::Relative };
            let view = console.table(&Selector::new(kind, cli.namespace.clone()), query, dates).await?;
            match cli.output {
                Output::Human => print_view(&view),
                Output::Json => println!("{}", serde_json::to_string_pretty(&view)?),
            }
        }
        Commands::Get { kind, name } => {
            let doc = console.get(&ResourceKind::parse(kind), name, ns).await?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&doc)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
            }
        }
        #[cfg(not(feature = "validate"))]
        Commands::Apply { file } => apply(&console, cli.output, &read_manifest(file)?).await?,
        #[cfg(feature = "validate")]
        Commands::Apply { file, validate_crd } => {
            let manifest = read_manifest(file)?;
            if let Some(crd_name) = validate_crd {
                let crd = console
                    .get(&ResourceKind::Known(kview_core::KnownKind::CustomResourceDefinitions), crd_name, None)
                    .await?;
                let issues = kview_schema::validate::validate_yaml(&crd, &manifest)?;
                if !issues.is_empty() {
                    for i in &issues {
                        match &i.hint {
                            Some(h) => eprintln!("{}: {} ({})", i.path, i.error, h),
                            None => eprintln!("{}: {}", i.path, i.error),
                        }
                    }
                    return Err(anyhow!("{} validation issue(s); nothing applied", issues.len()));
                }
            }
            apply(&console, cli.output, &manifest).await?
        }
        Commands::Delete { kind, name } => {
            let gone = console.delete(&ResourceKind::parse(kind), name, ns).await?;
            match cli.output {
                Output::Human => println!("{} {} deleted", gone.kind, gone.name),
                Output::Json => println!("{}", serde_json::to_string_pretty(&gone)?),
            }
        }
        Commands::History { kind, name, op, failed, succeeded, page, page_size } => {
            let operation_type = op
                .as_deref()
                .map(OperationType::from_str)
                .transpose()
                .map_err(|e| anyhow!(e))?;
            let success = match (*failed, *succeeded) {
                (true, _) => Some(false),
                (_, true) => Some(true),
                _ => None,
            };
            let filter = HistoryFilter {
                resource_type: kind.clone(),
                resource_name: name.clone(),
                namespace: cli.namespace.clone(),
                operation_type,
                success,
            };
            let res = console.history(&filter, *page, *page_size).await?;
            match cli.output {
                Output::Human => print_history(&res),
                Output::Json => println!("{}", serde_json::to_string_pretty(&res)?),
            }
        }
        Commands::HistoryShow { id } => {
            let detail = console.history_detail(id).await?;
            match cli.output {
                Output::Human => {
                    let e = &detail.entry;
                    println!("id:        {}", e.id);
                    println!("when:      {}", when(e.created_at));
                    println!("operation: {} ({})", e.operation_type.as_str(), outcome(e));
                    println!("object:    {} {}", e.resource_type, object_name(e));
                    println!("operator:  {} ({})", e.operator_name, e.operator_id);
                    if let Some(d) = &detail.diff {
                        println!("changes:   +{} ~{} -{}", d.adds, d.updates, d.removes);
                    }
                    if let Some(msg) = &e.error_message {
                        println!("error:     {}", msg);
                    }
                    println!("--- submitted");
                    print!("{}", e.resource_yaml);
                    if let Some(prev) = &e.previous_yaml {
                        println!("--- previous");
                        print!("{}", prev);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
            }
        }
    }
    Ok(())
}

async fn apply(console: &Console, output: Output, manifest: &str) -> Result<()> {
    let applied = console.apply(manifest).await?;
    match output {
        Output::Human => match &applied.namespace {
            Some(ns) => println!("{} {}/{} applied", applied.kind, ns, applied.name),
            None => println!("{} {} applied", applied.kind, applied.name),
        },
        Output::Json => println!("{}", serde_json::to_string_pretty(&applied)?),
    }
    Ok(())
}

fn print_view(view: &TableView) {
    let headers: Vec<String> = view.columns.iter().map(|c| c.header.to_uppercase()).collect();
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    let rows: Vec<Vec<String>> = view.rows.iter().map(|r| r.cells.iter().map(|c| c.text.clone()).collect()).collect();
    print_table(&headers, &rows);
}

fn print_history(page: &HistoryPage) {
    let rows: Vec<Vec<String>> = page
        .data
        .iter()
        .map(|e| {
            vec![
                when(e.created_at),
                e.operation_type.as_str().to_string(),
                e.resource_type.clone(),
                object_name(e),
                outcome(e).to_string(),
                e.operator_name.clone(),
                e.id.clone(),
            ]
        })
        .collect();
    print_table(&["WHEN", "OP", "KIND", "OBJECT", "RESULT", "OPERATOR", "ID"], &rows);
    let pages = page.total.div_ceil(page.page_size.max(1) as u64).max(1);
    println!("page {}/{} ({} entries)", page.page, pages, page.total);
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    let line = |cells: Vec<&str>| {
        let parts: Vec<String> = cells.iter().zip(&widths).map(|(c, w)| format!("{:<w$}", c, w = *w)).collect();
        println!("{}", parts.join("  ").trim_end());
    };
    line(headers.to_vec());
    for row in rows {
        line(row.iter().map(String::as_str).collect());
    }
}

fn when(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

fn outcome(e: &HistoryEntry) -> &'static str {
    if e.success { "ok" } else { "failed" }
}

fn object_name(e: &HistoryEntry) -> String {
    match &e.namespace {
        Some(ns) => format!("{}/{}", ns, e.resource_name),
        None => e.resource_name.clone(),
    }
}
