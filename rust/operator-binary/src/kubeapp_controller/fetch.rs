use kubeapp_crd::KubeApp;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    k8s_openapi::api::{
        apps::v1::Deployment,
        core::v1::{PersistentVolumeClaim, Service},
        networking::v1::Ingress,
    },
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::types::FetchedChildState;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("failed to get Deployment [{name}]"))]
    GetDeployment {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to get Service [{name}]"))]
    GetService {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to get Ingress [{name}]"))]
    GetIngress {
        source: stackable_operator::client::Error,
        name: String,
    },
    #[snafu(display("failed to get PersistentVolumeClaim [{name}]"))]
    GetPvc {
        source: stackable_operator::client::Error,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Look up the current state of all four child kinds by their effective
/// names. Absence is a regular outcome here, not an error.
pub async fn fetch_child_state(
    client: &Client,
    app: &KubeApp,
    namespace: &str,
) -> Result<FetchedChildState> {
    let deployment_name = app.deployment_name();
    let service_name = app.service_name();
    let ingress_name = app.ingress_name();
    let pvc_name = app.pvc_name();

    let deployment = client
        .get_opt::<Deployment>(&deployment_name, namespace)
        .await
        .context(GetDeploymentSnafu {
            name: deployment_name,
        })?;
    let service = client
        .get_opt::<Service>(&service_name, namespace)
        .await
        .context(GetServiceSnafu { name: service_name })?;
    let ingress = client
        .get_opt::<Ingress>(&ingress_name, namespace)
        .await
        .context(GetIngressSnafu { name: ingress_name })?;
    let pvc = client
        .get_opt::<PersistentVolumeClaim>(&pvc_name, namespace)
        .await
        .context(GetPvcSnafu { name: pvc_name })?;

    Ok(FetchedChildState {
        deployment,
        service,
        ingress,
        pvc,
    })
}
