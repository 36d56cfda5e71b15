use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;
use prometheus_client::registry::Registry;

use llmkube_k8s_util::client::new_client_with_metrics;
use llmkube_metal_agent::agent::Agent;
use llmkube_metal_agent::executor::Executor;
use llmkube_metal_agent::metrics::Metrics;
use llmkube_metal_agent::registry::resolve_host_ip;
use llmkube_metal_agent::watcher;
use llmkube_operator::telemetry;

#[get("/metrics")]
async fn metrics(state: Data<Metrics>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(state.encode())
}

#[get("/healthz")]
async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "llmkube-metal-agent",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    #[arg(long, env)]
    namespace: Option<String>,

    #[arg(long, default_value = "/var/lib/llmkube/metal-models", env)]
    model_store: PathBuf,

    #[arg(long, default_value = "llama-server", env)]
    llama_server: PathBuf,

    #[arg(long, default_value_t = 9090, env)]
    port: u32,

    #[arg(long, env)]
    host_ip: Option<String>,

    #[arg(long, default_value = "info", env)]
    log_filter: String,

    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    #[arg(long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        "llmkube-metal-agent",
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("llmkube_metal_agent");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let host_ip = resolve_host_ip(args.host_ip.as_deref()).await?;
    let metrics_state = Metrics::default();
    let executor = Arc::new(Executor::new(args.model_store, args.llama_server));
    let agent = Arc::new(Agent::new(client.clone(), executor, host_ip, metrics_state.clone()));

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let watcher = watcher::run(client, args.namespace, tx);
    let agent_loop = agent.run(rx);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(metrics_state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .service(healthz)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    tokio::join!(watcher, agent_loop, server.run()).2?;
    Ok(())
}
