use clap::Parser;
use statusd::{ApplicationStatusProvider, Config, DetachedProvider, HttpStatusProvider};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "statusd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }

    let provider: Arc<dyn ApplicationStatusProvider> = match &cfg.status_provider {
        Some(provider_cfg) => {
            let provider = match HttpStatusProvider::from_config(provider_cfg) {
                Ok(provider) => provider,
                Err(err) => {
                    error!(error = %err, "не удалось создать HTTP-клиент");
                    std::process::exit(1);
                }
            };
            info!(url = %provider_cfg.url, "статус приложения опрашивается по HTTP");
            Arc::new(provider)
        }
        None => {
            info!("источник статуса приложения не задан, приложение считается отключённым");
            Arc::new(DetachedProvider)
        }
    };

    info!(
        listen = %cfg.listen,
        sample_interval_seconds = cfg.sample_interval_seconds,
        "запуск statusd"
    );

    let handle = match statusd::start(cfg, provider).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "не удалось запустить statusd");
            std::process::exit(1);
        }
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    handle.shutdown().await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
