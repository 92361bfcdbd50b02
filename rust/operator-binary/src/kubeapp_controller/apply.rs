use snafu::{ResultExt, Snafu};
use stackable_operator::client::Client;
use strum::{EnumDiscriminants, IntoStaticStr};

use super::types::ClusterAction;
use crate::kubeapp_controller::FIELD_MANAGER_SCOPE;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to create Deployment"))]
    CreateDeployment {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to update Deployment"))]
    UpdateDeployment {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to delete Deployment"))]
    DeleteDeployment {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to create Service"))]
    CreateService {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to update Service"))]
    UpdateService {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to delete Service"))]
    DeleteService {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to create Ingress"))]
    CreateIngress {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to update Ingress"))]
    UpdateIngress {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to delete Ingress"))]
    DeleteIngress {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to apply PersistentVolumeClaim"))]
    ApplyPvc {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to delete PersistentVolumeClaim"))]
    DeletePvc {
        source: stackable_operator::client::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Execute one planned action. The first failing call aborts the pass so it
/// gets retried as a whole.
pub async fn apply_cluster_action(client: &Client, action: ClusterAction) -> Result<()> {
    match action {
        ClusterAction::CreateDeployment(deployment) => {
            client
                .create(deployment.as_ref())
                .await
                .context(CreateDeploymentSnafu)?;
        }
        ClusterAction::UpdateDeployment(deployment) => {
            client
                .update(deployment.as_ref())
                .await
                .context(UpdateDeploymentSnafu)?;
        }
        ClusterAction::DeleteDeployment(deployment) => {
            client
                .delete(deployment.as_ref())
                .await
                .context(DeleteDeploymentSnafu)?;
        }
        ClusterAction::CreateService(service) => {
            client
                .create(service.as_ref())
                .await
                .context(CreateServiceSnafu)?;
        }
        ClusterAction::UpdateService(service) => {
            client
                .update(service.as_ref())
                .await
                .context(UpdateServiceSnafu)?;
        }
        ClusterAction::DeleteService(service) => {
            client
                .delete(service.as_ref())
                .await
                .context(DeleteServiceSnafu)?;
        }
        ClusterAction::CreateIngress(ingress) => {
            client
                .create(ingress.as_ref())
                .await
                .context(CreateIngressSnafu)?;
        }
        ClusterAction::UpdateIngress(ingress) => {
            client
                .update(ingress.as_ref())
                .await
                .context(UpdateIngressSnafu)?;
        }
        ClusterAction::DeleteIngress(ingress) => {
            client
                .delete(ingress.as_ref())
                .await
                .context(DeleteIngressSnafu)?;
        }
        ClusterAction::ApplyPvc(pvc) => {
            client
                .apply_patch(FIELD_MANAGER_SCOPE, pvc.as_ref(), pvc.as_ref())
                .await
                .context(ApplyPvcSnafu)?;
        }
        ClusterAction::DeletePvc(pvc) => {
            client.delete(pvc.as_ref()).await.context(DeletePvcSnafu)?;
        }
        ClusterAction::SkipProtectedPvc { name } => {
            tracing::warn!(
                pvc = %name,
                "pvc is disabled but forceDelete is not set, leaving the claim in place"
            );
        }
    }
    Ok(())
}
