//! Level-triggered controller for `KubeApp` composites. Every pass fetches
//! the live child state, plans the minimal convergence and applies it.

use std::{sync::Arc, time::Duration};

use kubeapp_crd::KubeApp;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    kube::{core::DeserializeGuard, runtime::controller::Action, ResourceExt},
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::kubeapp_controller::types::ClusterAction;

mod apply;
mod build;
mod fetch;
mod types;

pub const FIELD_MANAGER_SCOPE: &str = "kubeapp";

pub struct Ctx {
    pub client: Client,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("KubeApp object is invalid"))]
    InvalidKubeApp {
        source: stackable_operator::kube::core::error_boundary::InvalidObject,
    },
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,
    #[snafu(display("failed to fetch child resource state"))]
    FetchChildState { source: fetch::Error },
    #[snafu(display("failed to plan convergence"))]
    PlanConvergence { source: build::Error },
    #[snafu(display("failed to apply planned cluster action"))]
    ApplyClusterAction { source: apply::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_kubeapp(
    kubeapp: Arc<DeserializeGuard<KubeApp>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let kubeapp = kubeapp
        .0
        .as_ref()
        .map_err(stackable_operator::kube::core::error_boundary::InvalidObject::clone)
        .context(InvalidKubeAppSnafu)?;
    let namespace = kubeapp.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let client = &ctx.client;

    let state = fetch::fetch_child_state(client, kubeapp, &namespace)
        .await
        .context(FetchChildStateSnafu)?;
    let actions =
        build::plan_convergence(kubeapp, &namespace, &state).context(PlanConvergenceSnafu)?;

    if actions.iter().any(ClusterAction::is_mutation) {
        tracing::info!(
            kubeapp = %kubeapp.name_any(),
            actions = actions.len(),
            "cluster state drifted from descriptor, converging"
        );
    } else {
        tracing::debug!(kubeapp = %kubeapp.name_any(), "already converged");
    }

    for action in actions {
        apply::apply_cluster_action(client, action)
            .await
            .context(ApplyClusterActionSnafu)?;
    }

    Ok(Action::await_change())
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<KubeApp>>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> Action {
    match error {
        // wait for the object to be corrected instead of hot-looping
        Error::InvalidKubeApp { .. } => Action::await_change(),
        _ => Action::requeue(Duration::from_secs(10)),
    }
}
