//! clabernetes operator - containerlab topologies on Kubernetes

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use clabernetes_common::{
    APP_NAME_DEFAULT, APP_NAME_ENV, CLIENT_OPERATION_TIMEOUT_MULTIPLIER_ENV, EXIT_CODE_ERROR,
    EXIT_CODE_SUCCESS, MANAGER_LOGGER_LEVEL_ENV,
};
use clabernetes_operator::http::HttpServer;
use clabernetes_operator::logging::{TelemetryConfig, TelemetryLogManager};
use clabernetes_operator::{
    Clabernetes, Collaborators, Error, StartupOptions, DEFAULT_HTTP_PORT, PROCESS_INSTANCE,
};

/// clabernetes - run containerlab topologies in Kubernetes
#[derive(Parser, Debug)]
#[command(name = "clabernetes", version, about, long_about = None)]
struct Cli {
    /// Run the one-shot initializer instead of the controller
    #[arg(long)]
    initializer: bool,

    /// Level for the manager logger
    #[arg(long, env = MANAGER_LOGGER_LEVEL_ENV, default_value = "info")]
    logger_level: String,

    /// Application name, used for leases and the global config ConfigMap
    #[arg(long, env = APP_NAME_ENV, default_value = APP_NAME_DEFAULT)]
    app_name: String,

    /// Scale applied to the default client operation timeout
    #[arg(long, env = CLIENT_OPERATION_TIMEOUT_MULTIPLIER_ENV, default_value_t = 1.0)]
    client_operation_timeout_multiplier: f64,

    /// Port for the alive/ready endpoints
    #[arg(long, env = "HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Pod name, prefixes the leader election identity
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Pod namespace, preferred over the service account namespace
    #[arg(long, env = "POD_NAMESPACE")]
    pod_namespace: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let options = StartupOptions {
        initializer: cli.initializer,
        logger_level: cli.logger_level,
        app_name: cli.app_name.clone(),
        timeout_multiplier: cli.client_operation_timeout_multiplier,
        pod_name: cli.pod_name.clone(),
        pod_namespace: cli.pod_namespace.clone(),
    };

    let collaborators = Collaborators {
        logs: Arc::new(TelemetryLogManager::new(TelemetryConfig {
            service_name: cli.app_name,
            pod_name: cli.pod_name,
            pod_namespace: cli.pod_namespace,
            ..Default::default()
        })),
        http: Arc::new(HttpServer::new(SocketAddr::from((
            [0, 0, 0, 0],
            cli.http_port,
        )))),
    };

    let clabernetes = match Clabernetes::new(options, &PROCESS_INSTANCE, collaborators) {
        Ok(clabernetes) => clabernetes,
        Err(e) => {
            // logging may not be up yet
            eprintln!("CRITICAL: failed constructing clabernetes: {e}");
            std::process::exit(EXIT_CODE_ERROR);
        }
    };

    let code = match clabernetes.start().await {
        Ok(()) | Err(Error::Cancelled) => EXIT_CODE_SUCCESS,
        Err(e) => {
            clabernetes.base_logger().critical(format!("fatal: {e}"));
            EXIT_CODE_ERROR
        }
    };

    clabernetes.exit(code).await;
}
