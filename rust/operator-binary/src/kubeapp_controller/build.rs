//! Translates a `KubeApp` descriptor into its four child resources and plans
//! the minimal set of mutating calls that converges the cluster onto it.

use std::collections::BTreeMap;

use kubeapp_crd::{KubeApp, APP_LABEL};
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::{
    builder::meta::ObjectMetaBuilder,
    k8s_openapi::{
        api::{
            apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
            core::v1::{
                Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
                PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
                VolumeResourceRequirements,
            },
            networking::v1::{
                HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
                IngressServiceBackend, IngressSpec, ServiceBackendPort,
            },
        },
        apimachinery::pkg::{
            api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
        },
    },
    kube::ResourceExt,
    kvp::{AnnotationError, Annotations, LabelError, Labels},
};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::types::{ClusterAction, FetchedChildState};

/// Replica count used when a descriptor is built directly and carries no
/// positive replica value. The template path defaults to 3 instead.
pub const DIRECT_BUILD_REPLICAS: i32 = 1;

const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
const DEFAULT_PATH_TYPE: &str = "Prefix";
const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("deployment is enabled but carries no deployment spec"))]
    NoDeploymentConfig,
    #[snafu(display("service is enabled but carries no service spec"))]
    NoServiceConfig,
    #[snafu(display("a service requires a deployment spec to select pods from"))]
    ServiceWithoutDeployment,
    #[snafu(display("ingress is enabled but carries no ingress spec"))]
    NoIngressConfig,
    #[snafu(display("pvc is enabled but carries no pvc spec"))]
    NoPvcConfig,
    #[snafu(display("deployment [{deployment}] has no container image"))]
    DeploymentImageMissing { deployment: String },
    #[snafu(display("port [{port}] is outside the valid range 1..=65535"))]
    PortOutOfRange { port: i32 },
    #[snafu(display("ingress host must not be empty"))]
    IngressHostMissing,
    #[snafu(display("ingress backend service name must not be empty"))]
    IngressBackendMissing,
    #[snafu(display("pvc requested storage size must not be empty"))]
    PvcStorageMissing,
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },
    #[snafu(display("failed to build child labels"))]
    BuildLabels { source: LabelError },
    #[snafu(display("failed to build child annotations"))]
    BuildAnnotations { source: AnnotationError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn validate_port(port: i32) -> Result<i32> {
    ensure!((1..=65535).contains(&port), PortOutOfRangeSnafu { port });
    Ok(port)
}

fn child_metadata(
    app: &KubeApp,
    name: &str,
    namespace: &str,
) -> Result<stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta> {
    let labels = Labels::try_from(app.child_labels()).context(BuildLabelsSnafu)?;
    let annotations =
        Annotations::try_from(app.annotations().clone()).context(BuildAnnotationsSnafu)?;
    Ok(ObjectMetaBuilder::new()
        .name(name)
        .namespace(namespace)
        .ownerreference_from_resource(app, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .with_labels(labels)
        .with_annotations(annotations)
        .build())
}

/// Build the Deployment child. Fields absent from the descriptor are left
/// unset so the platform applies its own defaults; the only synthetic value
/// is the replica count.
pub fn build_deployment(app: &KubeApp, namespace: &str) -> Result<Deployment> {
    let config = app.spec.deployment.as_ref().context(NoDeploymentConfigSnafu)?;
    let name = app.deployment_name();
    ensure!(
        !config.image.is_empty(),
        DeploymentImageMissingSnafu { deployment: name }
    );
    for port in &config.ports {
        validate_port(port.container_port)?;
    }

    let replicas = config
        .replicas
        .filter(|replicas| *replicas > 0)
        .unwrap_or(DIRECT_BUILD_REPLICAS);

    let container = Container {
        name: name.clone(),
        image: Some(config.image.clone()),
        resources: config.resources.clone(),
        ports: (!config.ports.is_empty()).then(|| config.ports.clone()),
        liveness_probe: config.liveness_probe.clone(),
        readiness_probe: config.readiness_probe.clone(),
        lifecycle: config.lifecycle.clone(),
        env: (!config.env.is_empty()).then(|| config.env.clone()),
        volume_mounts: (!config.volume_mounts.is_empty()).then(|| {
            config
                .volume_mounts
                .iter()
                .map(|mount| VolumeMount {
                    name: mount.name.clone(),
                    mount_path: mount.mount_path.clone(),
                    read_only: mount.read_only.then_some(true),
                    ..VolumeMount::default()
                })
                .collect()
        }),
        ..Container::default()
    };

    let volumes: Vec<Volume> = config
        .volumes
        .iter()
        .filter_map(|volume| volume.to_volume())
        .collect();

    let pod_labels = BTreeMap::from([(APP_LABEL.to_string(), name.clone())]);
    let pod_label_set = Labels::try_from(pod_labels.clone()).context(BuildLabelsSnafu)?;

    Ok(Deployment {
        metadata: child_metadata(app, &name, namespace)?,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMetaBuilder::new().with_labels(pod_label_set).build()),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    node_selector: config.node_selector.clone(),
                    termination_grace_period_seconds: config.termination_grace_period_seconds,
                    image_pull_secrets: (!config.image_pull_secrets.is_empty())
                        .then(|| config.image_pull_secrets.clone()),
                    affinity: config.affinity.clone(),
                    dns_config: config.dns_config.clone(),
                    ..PodSpec::default()
                }),
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(25)),
                    max_unavailable: Some(IntOrString::Int(25)),
                }),
            }),
            ..DeploymentSpec::default()
        }),
        status: None,
    })
}

/// Build the Service child, selecting the deployment's pods by the `app`
/// label.
pub fn build_service(app: &KubeApp, namespace: &str) -> Result<Service> {
    let config = app.spec.service.as_ref().context(NoServiceConfigSnafu)?;
    ensure!(
        app.spec.deployment.is_some(),
        ServiceWithoutDeploymentSnafu
    );
    let name = app.service_name();
    let port = validate_port(config.port)?;
    let target_port = validate_port(config.target_port)?;

    let service_type = match config.service_type.as_deref() {
        Some(known @ ("ClusterIP" | "NodePort" | "LoadBalancer")) => known,
        Some(other) => {
            tracing::debug!(
                service = %name,
                service_type = %other,
                "unrecognized service type, falling back to {DEFAULT_SERVICE_TYPE}"
            );
            DEFAULT_SERVICE_TYPE
        }
        None => DEFAULT_SERVICE_TYPE,
    };

    Ok(Service {
        metadata: child_metadata(app, &name, namespace)?,
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                app.deployment_name(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some(format!("{name}-port")),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            type_: Some(service_type.to_string()),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

/// Build the Ingress child with a single host rule and path.
pub fn build_ingress(app: &KubeApp, namespace: &str) -> Result<Ingress> {
    let config = app.spec.ingress.as_ref().context(NoIngressConfigSnafu)?;
    ensure!(!config.host.is_empty(), IngressHostMissingSnafu);
    ensure!(!config.service_name.is_empty(), IngressBackendMissingSnafu);
    let name = app.ingress_name();
    let service_port = validate_port(config.service_port)?;

    let path_type = match config.path_type.as_deref() {
        Some(known @ ("Prefix" | "Exact" | "ImplementationSpecific")) => known,
        Some(other) => {
            tracing::debug!(
                ingress = %name,
                path_type = %other,
                "unrecognized path type, falling back to {DEFAULT_PATH_TYPE}"
            );
            DEFAULT_PATH_TYPE
        }
        None => DEFAULT_PATH_TYPE,
    };
    let path = config
        .path
        .clone()
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| "/".to_string());

    let ingress_class = config
        .ingress_class_name
        .clone()
        .filter(|class| !class.is_empty());

    let mut metadata = child_metadata(app, &name, namespace)?;
    if let Some(class) = &ingress_class {
        // keep the legacy annotation consistent with spec.ingressClassName
        let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
        if let Some(existing) = annotations.get(INGRESS_CLASS_ANNOTATION) {
            if existing != class {
                tracing::info!(
                    ingress = %name,
                    annotation = %existing,
                    field = %class,
                    "ingress.class annotation disagrees with ingressClassName, overriding"
                );
            }
        }
        annotations.insert(INGRESS_CLASS_ANNOTATION.to_string(), class.clone());
    }

    Ok(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: ingress_class,
            rules: Some(vec![IngressRule {
                host: Some(config.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path),
                        path_type: path_type.to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: config.service_name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(service_port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        status: None,
    })
}

/// Build the PersistentVolumeClaim child.
pub fn build_pvc(app: &KubeApp, namespace: &str) -> Result<PersistentVolumeClaim> {
    let config = app.spec.pvc.as_ref().context(NoPvcConfigSnafu)?;
    ensure!(!config.storage.is_empty(), PvcStorageMissingSnafu);
    let name = app.pvc_name();

    Ok(PersistentVolumeClaim {
        metadata: child_metadata(app, &name, namespace)?,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(config.effective_access_modes()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(config.storage.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            storage_class_name: config
                .storage_class_name
                .clone()
                .filter(|class| !class.is_empty()),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    })
}

/// `true` when every field present in `desired` also holds in `actual`.
/// Fields the server defaulted on top of our last write are ignored, which
/// is what keeps repeated passes over unchanged state free of writes.
fn is_json_covered(desired: &serde_json::Value, actual: &serde_json::Value) -> bool {
    match (desired, actual) {
        (serde_json::Value::Object(desired), serde_json::Value::Object(actual)) => {
            desired.iter().all(|(key, desired_value)| {
                actual
                    .get(key)
                    .is_some_and(|actual_value| is_json_covered(desired_value, actual_value))
            })
        }
        (serde_json::Value::Array(desired), serde_json::Value::Array(actual)) => {
            desired.len() == actual.len()
                && desired
                    .iter()
                    .zip(actual)
                    .all(|(desired_value, actual_value)| {
                        is_json_covered(desired_value, actual_value)
                    })
        }
        (desired, actual) => desired == actual,
    }
}

fn needs_update<T: Serialize>(desired: &T, actual: &T) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(actual)) {
        (Ok(desired), Ok(actual)) => !is_json_covered(&desired, &actual),
        _ => true,
    }
}

/// Plan a single convergence pass: compare the descriptor against the
/// fetched cluster state and emit the minimal list of actions. Translation
/// or validation failures abort the whole pass so a partially applied
/// composite is never reported as success.
pub fn plan_convergence(
    app: &KubeApp,
    namespace: &str,
    state: &FetchedChildState,
) -> Result<Vec<ClusterAction>> {
    let mut actions = Vec::new();

    if app.spec.enable_deployment {
        let mut desired = build_deployment(app, namespace)?;
        match &state.deployment {
            None => actions.push(ClusterAction::CreateDeployment(Box::new(desired))),
            Some(existing) => {
                if needs_update(&desired.spec, &existing.spec)
                    || needs_update(&desired.metadata.labels, &existing.metadata.labels)
                {
                    // carry the concurrency token so a conflicting external
                    // edit rejects this update instead of being overwritten
                    desired.metadata.resource_version = existing.resource_version();
                    actions.push(ClusterAction::UpdateDeployment(Box::new(desired)));
                }
            }
        }
    } else if let Some(existing) = &state.deployment {
        actions.push(ClusterAction::DeleteDeployment(Box::new(existing.clone())));
    }

    if app.spec.enable_service {
        let mut desired = build_service(app, namespace)?;
        match &state.service {
            None => actions.push(ClusterAction::CreateService(Box::new(desired))),
            Some(existing) => {
                if needs_update(&desired.spec, &existing.spec)
                    || needs_update(&desired.metadata.labels, &existing.metadata.labels)
                {
                    desired.metadata.resource_version = existing.resource_version();
                    // clusterIP is immutable and server-assigned
                    if let (Some(desired_spec), Some(existing_spec)) =
                        (desired.spec.as_mut(), existing.spec.as_ref())
                    {
                        desired_spec.cluster_ip = existing_spec.cluster_ip.clone();
                        desired_spec.cluster_ips = existing_spec.cluster_ips.clone();
                    }
                    actions.push(ClusterAction::UpdateService(Box::new(desired)));
                }
            }
        }
    } else if let Some(existing) = &state.service {
        actions.push(ClusterAction::DeleteService(Box::new(existing.clone())));
    }

    if app.spec.enable_ingress {
        let mut desired = build_ingress(app, namespace)?;
        match &state.ingress {
            None => actions.push(ClusterAction::CreateIngress(Box::new(desired))),
            Some(existing) => {
                if needs_update(&desired.spec, &existing.spec)
                    || needs_update(&desired.metadata.labels, &existing.metadata.labels)
                {
                    desired.metadata.resource_version = existing.resource_version();
                    actions.push(ClusterAction::UpdateIngress(Box::new(desired)));
                }
            }
        }
    } else if let Some(existing) = &state.ingress {
        actions.push(ClusterAction::DeleteIngress(Box::new(existing.clone())));
    }

    if app.spec.enable_pvc {
        let desired = build_pvc(app, namespace)?;
        let in_sync = state
            .pvc
            .as_ref()
            .is_some_and(|existing| !needs_update(&desired.spec, &existing.spec));
        if !in_sync {
            actions.push(ClusterAction::ApplyPvc(Box::new(desired)));
        }
    } else {
        let force_delete = app.spec.pvc.as_ref().is_some_and(|pvc| pvc.force_delete);
        match (&state.pvc, force_delete) {
            (Some(existing), true) => {
                actions.push(ClusterAction::DeletePvc(Box::new(existing.clone())));
            }
            (Some(_), false) => {
                actions.push(ClusterAction::SkipProtectedPvc {
                    name: app.pvc_name(),
                });
            }
            (None, _) => {}
        }
    }

    Ok(actions)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const NAMESPACE: &str = "retail";

    fn full_app() -> KubeApp {
        serde_yaml::from_str(
            "
            apiVersion: apps.kube.com/v1alpha1
            kind: KubeApp
            metadata:
              name: shop
              namespace: retail
              uid: 6ee2f3b1-58d1-4a19-9f0c-7a05c8e1c001
            spec:
              enableDeployment: true
              enableService: true
              enableIngress: true
              enablePvc: true
              deployment:
                name: shop
                image: registry.local/shop:v4
                replicas: 2
              service:
                name: shop
                port: 80
                targetPort: 8080
              ingress:
                host: shop.example.com
                serviceName: shop
                servicePort: 80
              pvc:
                name: shop-data
                storage: 5Gi
            ",
        )
        .unwrap()
    }

    fn converged_state(app: &KubeApp) -> FetchedChildState {
        FetchedChildState {
            deployment: Some(build_deployment(app, NAMESPACE).unwrap()),
            service: Some(build_service(app, NAMESPACE).unwrap()),
            ingress: Some(build_ingress(app, NAMESPACE).unwrap()),
            pvc: Some(build_pvc(app, NAMESPACE).unwrap()),
        }
    }

    #[test]
    fn test_replicas_default_to_one_on_direct_build() {
        let mut app = full_app();
        app.spec.deployment.as_mut().unwrap().replicas = None;
        let deployment = build_deployment(&app, NAMESPACE).unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));

        let mut app = full_app();
        app.spec.deployment.as_mut().unwrap().replicas = Some(0);
        let deployment = build_deployment(&app, NAMESPACE).unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));
    }

    #[test]
    fn test_missing_image_fails_fast() {
        let mut app = full_app();
        app.spec.deployment.as_mut().unwrap().image = String::new();
        let error = build_deployment(&app, NAMESPACE).unwrap_err();
        assert!(matches!(error, Error::DeploymentImageMissing { .. }));
        // a translation error aborts the whole pass
        let error = plan_convergence(&app, NAMESPACE, &FetchedChildState::default()).unwrap_err();
        assert!(matches!(error, Error::DeploymentImageMissing { .. }));
    }

    #[rstest]
    #[case(None, "ClusterIP")]
    #[case(Some("NodePort"), "NodePort")]
    #[case(Some("LoadBalancer"), "LoadBalancer")]
    #[case(Some("Bogus"), "ClusterIP")]
    fn test_service_type_defaulting(#[case] requested: Option<&str>, #[case] expected: &str) {
        let mut app = full_app();
        app.spec.service.as_mut().unwrap().service_type = requested.map(str::to_string);
        let service = build_service(&app, NAMESPACE).unwrap();
        assert_eq!(service.spec.unwrap().type_.as_deref(), Some(expected));
    }

    #[rstest]
    #[case(0)]
    #[case(-80)]
    #[case(70000)]
    fn test_port_validation(#[case] port: i32) {
        let mut app = full_app();
        app.spec.service.as_mut().unwrap().port = port;
        assert!(matches!(
            build_service(&app, NAMESPACE).unwrap_err(),
            Error::PortOutOfRange { port: rejected } if rejected == port
        ));
    }

    #[rstest]
    #[case(None, "Prefix")]
    #[case(Some("Exact"), "Exact")]
    #[case(Some("ImplementationSpecific"), "ImplementationSpecific")]
    #[case(Some("Weird"), "Prefix")]
    fn test_ingress_path_type_defaulting(#[case] requested: Option<&str>, #[case] expected: &str) {
        let mut app = full_app();
        app.spec.ingress.as_mut().unwrap().path_type = requested.map(str::to_string);
        let ingress = build_ingress(&app, NAMESPACE).unwrap();
        let rules = ingress.spec.unwrap().rules.unwrap();
        let path = &rules[0].http.as_ref().unwrap().paths[0];
        assert_eq!(path.path_type, expected);
        assert_eq!(path.path.as_deref(), Some("/"));
    }

    #[test]
    fn test_ingress_requires_host_and_backend() {
        let mut app = full_app();
        app.spec.ingress.as_mut().unwrap().host = String::new();
        assert!(matches!(
            build_ingress(&app, NAMESPACE).unwrap_err(),
            Error::IngressHostMissing
        ));

        let mut app = full_app();
        app.spec.ingress.as_mut().unwrap().service_name = String::new();
        assert!(matches!(
            build_ingress(&app, NAMESPACE).unwrap_err(),
            Error::IngressBackendMissing
        ));
    }

    #[test]
    fn test_ingress_class_kept_consistent_with_annotation() {
        let mut app = full_app();
        app.spec.ingress.as_mut().unwrap().ingress_class_name = Some("nginx".to_string());
        app.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("kubernetes.io/ingress.class".to_string(), "old".to_string());
        let ingress = build_ingress(&app, NAMESPACE).unwrap();
        assert_eq!(
            ingress
                .metadata
                .annotations
                .unwrap()
                .get("kubernetes.io/ingress.class")
                .map(String::as_str),
            Some("nginx")
        );
        assert_eq!(
            ingress.spec.unwrap().ingress_class_name.as_deref(),
            Some("nginx")
        );
    }

    #[test]
    fn test_pvc_defaults_to_single_writer() {
        let app = full_app();
        let pvc = build_pvc(&app, NAMESPACE).unwrap();
        assert_eq!(
            pvc.spec.unwrap().access_modes,
            Some(vec!["ReadWriteOnce".to_string()])
        );
    }

    #[test]
    fn test_empty_cluster_plans_four_creations() {
        let app = full_app();
        let actions = plan_convergence(&app, NAMESPACE, &FetchedChildState::default()).unwrap();
        assert_eq!(actions.len(), 4);
        assert!(actions.iter().all(ClusterAction::is_mutation));
        assert!(matches!(actions[0], ClusterAction::CreateDeployment(_)));
        assert!(matches!(actions[3], ClusterAction::ApplyPvc(_)));
    }

    #[test]
    fn test_second_pass_over_unchanged_state_is_free_of_writes() {
        let app = full_app();
        let state = converged_state(&app);
        let actions = plan_convergence(&app, NAMESPACE, &state).unwrap();
        assert!(
            actions.iter().all(|action| !action.is_mutation()),
            "expected zero mutating actions, got {actions:?}"
        );
    }

    #[test]
    fn test_server_defaulted_fields_do_not_force_updates() {
        let app = full_app();
        let mut state = converged_state(&app);
        {
            let service = state.service.as_mut().unwrap().spec.as_mut().unwrap();
            service.cluster_ip = Some("10.96.11.4".to_string());
            service.session_affinity = Some("None".to_string());
        }
        state
            .deployment
            .as_mut()
            .unwrap()
            .spec
            .as_mut()
            .unwrap()
            .revision_history_limit = Some(10);
        let actions = plan_convergence(&app, NAMESPACE, &state).unwrap();
        assert!(actions.iter().all(|action| !action.is_mutation()));
    }

    #[test]
    fn test_drifted_replicas_plan_update_with_concurrency_token() {
        let app = full_app();
        let mut state = converged_state(&app);
        {
            let deployment = state.deployment.as_mut().unwrap();
            deployment.metadata.resource_version = Some("4711".to_string());
            deployment.spec.as_mut().unwrap().replicas = Some(9);
        }
        let actions = plan_convergence(&app, NAMESPACE, &state).unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ClusterAction::UpdateDeployment(deployment) => {
                assert_eq!(deployment.metadata.resource_version.as_deref(), Some("4711"));
                assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(2));
            }
            other => panic!("expected a deployment update, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_children_are_deleted_when_present() {
        let enabled = full_app();
        let state = converged_state(&enabled);
        let mut app = full_app();
        app.spec.enable_deployment = false;
        app.spec.enable_service = false;
        app.spec.enable_ingress = false;
        app.spec.enable_pvc = false;
        app.spec.pvc.as_mut().unwrap().force_delete = true;
        let actions = plan_convergence(&app, NAMESPACE, &state).unwrap();
        assert_eq!(actions.len(), 4);
        assert!(matches!(actions[0], ClusterAction::DeleteDeployment(_)));
        assert!(matches!(actions[1], ClusterAction::DeleteService(_)));
        assert!(matches!(actions[2], ClusterAction::DeleteIngress(_)));
        assert!(matches!(actions[3], ClusterAction::DeletePvc(_)));
    }

    #[test]
    fn test_disabled_children_absent_is_a_noop() {
        let mut app = full_app();
        app.spec.enable_deployment = false;
        app.spec.enable_service = false;
        app.spec.enable_ingress = false;
        app.spec.enable_pvc = false;
        let actions = plan_convergence(&app, NAMESPACE, &FetchedChildState::default()).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_protected_pvc_is_never_deleted() {
        let enabled = full_app();
        let mut app = full_app();
        app.spec.enable_pvc = false;
        // forceDelete stays false
        let state = converged_state(&enabled);
        for _pass in 0..3 {
            let actions = plan_convergence(&app, NAMESPACE, &state).unwrap();
            let pvc_actions: Vec<_> = actions
                .iter()
                .filter(|action| {
                    matches!(
                        action,
                        ClusterAction::ApplyPvc(_)
                            | ClusterAction::DeletePvc(_)
                            | ClusterAction::SkipProtectedPvc { .. }
                    )
                })
                .collect();
            assert_eq!(pvc_actions.len(), 1);
            assert!(matches!(
                pvc_actions[0],
                ClusterAction::SkipProtectedPvc { .. }
            ));
        }
    }

    #[test]
    fn test_json_coverage_rules() {
        let desired = serde_json::json!({"a": 1, "b": {"c": [1, 2]}});
        let actual = serde_json::json!({"a": 1, "b": {"c": [1, 2], "d": "server"}, "e": 5});
        assert!(is_json_covered(&desired, &actual));

        let drifted = serde_json::json!({"a": 2, "b": {"c": [1, 2]}});
        assert!(!is_json_covered(&drifted, &actual));

        let shorter = serde_json::json!({"b": {"c": [1]}});
        assert!(!is_json_covered(&shorter, &actual));
    }
}
