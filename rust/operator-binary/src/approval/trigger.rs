//! Deployment trigger: maps an approved ticket's operation onto the
//! composite resource domain. Invoked by the outbox worker, never inline
//! with an approval response.

use kubeapp_crd::KubeApp;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::api::{
        apps::v1::Deployment,
        core::v1::{PersistentVolumeClaim, Service},
        networking::v1::Ingress,
    },
    kube::ResourceExt,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    models::{Operation, Request},
    repository::{self, RequestRepository},
    template,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to load the ticket's template"))]
    LoadTemplate { source: repository::Error },
    #[snafu(display("failed to build composite resource from template"))]
    BuildComposite { source: template::Error },
    #[snafu(display("failed to create composite resource"))]
    CreateComposite {
        source: stackable_operator::client::Error,
    },
    #[snafu(display("failed to fetch composite resource [{name}]"))]
    FetchComposite {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("composite resource [{name}] does not exist"))]
    CompositeGone { name: String },
    #[snafu(display("failed to patch composite resource [{name}]"))]
    PatchComposite {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to delete child resource [{name}]"))]
    DeleteChild {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to delete composite resource [{name}]"))]
    DeleteComposite {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to remove the completed ticket"))]
    RemoveTicket { source: repository::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct DeploymentTrigger {
    client: Client,
    repository: RequestRepository,
}

impl DeploymentTrigger {
    pub fn new(client: Client, repository: RequestRepository) -> Self {
        DeploymentTrigger { client, repository }
    }

    pub async fn dispatch(&self, request: &Request) -> Result<()> {
        tracing::info!(
            request_id = %request.request_id,
            operation = %request.operation,
            service = %request.service_name,
            "dispatching approved ticket"
        );
        match request.operation {
            Operation::Create => self.create(request).await,
            Operation::Update => self.update(request).await,
            Operation::Delete => self.delete(request).await,
        }
    }

    async fn create(&self, request: &Request) -> Result<()> {
        let stored = self
            .repository
            .find_template(request.template_id)
            .await
            .context(LoadTemplateSnafu)?;
        let app = template::build_kubeapp(request, &stored).context(BuildCompositeSnafu)?;
        self.client
            .create(&app)
            .await
            .context(CreateCompositeSnafu)?;
        Ok(())
    }

    /// Narrow by design: only the deployment child's image and replica
    /// count change, the rest of the descriptor stays as deployed.
    async fn update(&self, request: &Request) -> Result<()> {
        let name = &request.service_name;
        let namespace = &request.business_line;
        let existing = self
            .client
            .get_opt::<KubeApp>(name, namespace)
            .await
            .context(FetchCompositeSnafu { name: name.clone() })?
            .context(CompositeGoneSnafu { name: name.clone() })?;
        let patch = template::deployment_override_patch(&request.image, request.replicas);
        self.client
            .merge_patch(&existing, patch)
            .await
            .context(PatchCompositeSnafu { name: name.clone() })?;
        Ok(())
    }

    /// Delete the four child kinds, each guarded by an existence check,
    /// then the composite itself. The ticket row is only removed once the
    /// cluster side fully succeeded.
    async fn delete(&self, request: &Request) -> Result<()> {
        let name = &request.service_name;
        let namespace = &request.business_line;
        let app = self
            .client
            .get_opt::<KubeApp>(name, namespace)
            .await
            .context(FetchCompositeSnafu { name: name.clone() })?;

        if let Some(app) = app {
            let deployment_name = app.deployment_name();
            if let Some(deployment) = self
                .client
                .get_opt::<Deployment>(&deployment_name, namespace)
                .await
                .context(FetchCompositeSnafu {
                    name: deployment_name.clone(),
                })?
            {
                self.client
                    .delete(&deployment)
                    .await
                    .context(DeleteChildSnafu {
                        name: deployment_name,
                    })?;
            }

            let service_name = app.service_name();
            if let Some(service) = self
                .client
                .get_opt::<Service>(&service_name, namespace)
                .await
                .context(FetchCompositeSnafu {
                    name: service_name.clone(),
                })?
            {
                self.client
                    .delete(&service)
                    .await
                    .context(DeleteChildSnafu { name: service_name })?;
            }

            let ingress_name = app.ingress_name();
            if let Some(ingress) = self
                .client
                .get_opt::<Ingress>(&ingress_name, namespace)
                .await
                .context(FetchCompositeSnafu {
                    name: ingress_name.clone(),
                })?
            {
                self.client
                    .delete(&ingress)
                    .await
                    .context(DeleteChildSnafu { name: ingress_name })?;
            }

            let pvc_name = app.pvc_name();
            if let Some(pvc) = self
                .client
                .get_opt::<PersistentVolumeClaim>(&pvc_name, namespace)
                .await
                .context(FetchCompositeSnafu {
                    name: pvc_name.clone(),
                })?
            {
                self.client
                    .delete(&pvc)
                    .await
                    .context(DeleteChildSnafu { name: pvc_name })?;
            }

            self.client.delete(&app).await.context(DeleteCompositeSnafu {
                name: app.name_any(),
            })?;
        } else {
            tracing::info!(
                composite = %name,
                "composite resource already absent, nothing to delete in the cluster"
            );
        }

        self.repository
            .delete_request(request.request_id)
            .await
            .context(RemoveTicketSnafu)?;
        Ok(())
    }
}
