mod approval;
mod kubeapp_controller;

use std::sync::Arc;

use clap::{crate_description, crate_version, Parser};
use futures::StreamExt;
use kubeapp_crd::{KubeApp, APP_NAME, OPERATOR_NAME};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use stackable_operator::{
    cli::{Command, ProductOperatorRun},
    k8s_openapi::api::{
        apps::v1::Deployment,
        core::v1::{PersistentVolumeClaim, Service},
        networking::v1::Ingress,
    },
    kube::{
        core::DeserializeGuard,
        runtime::{watcher, Controller},
    },
    logging::controller::report_controller_reconciled,
    CustomResourceExt,
};

use crate::approval::{
    config::ApprovalConfig, outbox::OutboxWorker, repository::RequestRepository, roles,
    trigger::DeploymentTrigger, ApprovalService,
};

pub const KUBEAPP_CONTROLLER_NAME: &str = "kubeappcluster";

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    match opts.cmd {
        Command::Crd => {
            KubeApp::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(ProductOperatorRun {
            product_config: _,
            watch_namespace,
            tracing_target,
        }) => {
            stackable_operator::logging::initialize_logging(
                "KUBEAPP_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;

            let approval_config = ApprovalConfig::from_env()?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&approval_config.database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            roles::ensure_bootstrap_roles(&pool).await?;

            let redis_client = redis::Client::open(approval_config.redis_url.as_str())?;
            let cache = ConnectionManager::new(redis_client).await?;

            let repository =
                RequestRepository::new(pool.clone(), cache, approval_config.cache_ttl);
            let service = ApprovalService::new(pool.clone(), repository.clone());
            let trigger = DeploymentTrigger::new(client.clone(), repository.clone());
            let outbox_worker = OutboxWorker::new(
                pool,
                repository,
                trigger,
                approval_config.outbox_poll_interval,
            );
            tokio::spawn(outbox_worker.run());

            let listener = tokio::net::TcpListener::bind(&approval_config.api_listen_addr).await?;
            tracing::info!(
                addr = %approval_config.api_listen_addr,
                "serving the approval workflow api"
            );
            tokio::spawn(async move {
                if let Err(error) = axum::serve(listener, approval::api::router(service)).await {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "approval workflow api terminated"
                    );
                }
            });

            let kubeapp_controller = Controller::new(
                watch_namespace.get_api::<DeserializeGuard<KubeApp>>(&client),
                watcher::Config::default(),
            )
            .owns(
                watch_namespace.get_api::<Deployment>(&client),
                watcher::Config::default(),
            )
            .owns(
                watch_namespace.get_api::<Service>(&client),
                watcher::Config::default(),
            )
            .owns(
                watch_namespace.get_api::<Ingress>(&client),
                watcher::Config::default(),
            )
            .owns(
                watch_namespace.get_api::<PersistentVolumeClaim>(&client),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(
                kubeapp_controller::reconcile_kubeapp,
                kubeapp_controller::error_policy,
                Arc::new(kubeapp_controller::Ctx {
                    client: client.clone(),
                }),
            )
            .map(|res| {
                report_controller_reconciled(
                    &client,
                    &format!("{KUBEAPP_CONTROLLER_NAME}.{OPERATOR_NAME}"),
                    &res,
                );
            });

            kubeapp_controller.collect::<()>().await;
        }
    }

    Ok(())
}
