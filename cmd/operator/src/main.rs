use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Config;
use prometheus_client::registry::Registry;

use llmkube_k8s_util::client::new_client_with_metrics;
use llmkube_operator::controller::{OperatorConfig, State};
use llmkube_operator::metrics::Metrics;
use llmkube_operator::{inference, model, telemetry};

#[get("/metrics")]
async fn metrics(state: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(state.metrics())
}

#[get("/healthz")]
async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "llmkube-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    #[arg(long, default_value_t = 8080, env)]
    port: u32,

    #[arg(long, default_value = "info", env)]
    log_filter: String,

    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    #[arg(long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    #[arg(long, default_value = "/var/lib/llmkube/cache", env)]
    cache_root: String,

    #[arg(long, default_value = "100Gi", env)]
    cache_size: String,

    #[arg(long, env)]
    cache_storage_class: Option<String>,

    #[arg(long, default_value = "ReadWriteOnce", env)]
    cache_access_mode: String,

    #[arg(long, env)]
    custom_ca_configmap: Option<String>,

    #[arg(long, default_value = "ghcr.io/llmkube/model-fetcher:latest", env)]
    init_container_image: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        "llmkube-operator",
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("llmkube");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let operator_config = OperatorConfig {
        cache_root: args.cache_root,
        cache_enabled: true,
        cache_default_size: args.cache_size,
        cache_storage_class: args.cache_storage_class,
        cache_access_mode: args.cache_access_mode,
        custom_ca_configmap: args.custom_ca_configmap,
        init_container_image: args.init_container_image,
    };
    let state = State::new(Metrics::default(), operator_config);

    let model_controller = model::controller::run(state.clone(), client.clone());
    let inference_controller = inference::controller::run(state.clone(), client);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .service(healthz)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    tokio::join!(model_controller, inference_controller, server.run()).2?;
    Ok(())
}
