//! The `KubeApp` custom resource: a composite application descriptor that
//! toggles and configures up to four child resources (Deployment, Service,
//! Ingress, PersistentVolumeClaim).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::{
        Affinity, ConfigMapVolumeSource, ContainerPort, EmptyDirVolumeSource, EnvVar,
        HostPathVolumeSource, Lifecycle, LocalObjectReference, NFSVolumeSource,
        PersistentVolumeClaimVolumeSource, PodDNSConfig, Probe, ResourceRequirements,
        SecretVolumeSource, Volume,
    },
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
    utils::crds::{raw_object_list_schema, raw_object_schema},
};

pub const APP_NAME: &str = "kubeapp";
pub const OPERATOR_NAME: &str = "kubeapp.apps.kube.com";
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "kubeapp-operator";
pub const APP_LABEL: &str = "app";

/// Access mode granted to a PVC when the descriptor lists none (or only
/// unrecognized values).
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "apps.kube.com",
    version = "v1alpha1",
    kind = "KubeApp",
    plural = "kubeapps",
    shortname = "kapp",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct KubeAppSpec {
    /// Desired-state toggle for the Deployment child. `false` means the
    /// Deployment is deleted if it exists.
    #[serde(default)]
    pub enable_deployment: bool,

    /// Desired-state toggle for the Service child.
    #[serde(default)]
    pub enable_service: bool,

    /// Desired-state toggle for the Ingress child.
    #[serde(default)]
    pub enable_ingress: bool,

    /// Desired-state toggle for the PVC child. Disabling it does NOT delete
    /// the claim unless `pvc.forceDelete` is also set.
    #[serde(default)]
    pub enable_pvc: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PvcConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub name: String,
    pub image: String,

    /// Desired replica count. Values <= 0 (or absent) fall back to the
    /// caller-specific default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub ports: Vec<ContainerPort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub liveness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub lifecycle: Option<Lifecycle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMountConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub dns_config: Option<PodDNSConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_object_list_schema")]
    pub env: Vec<EnvVar>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,
    pub port: i32,
    pub target_port: i32,

    /// Service type. Unset or unrecognized values fall back to `ClusterIP`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub host: String,
    pub service_name: String,
    pub service_port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// One of `Prefix`, `Exact` or `ImplementationSpecific`. Unset or
    /// unrecognized values fall back to `Prefix`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcConfig {
    #[serde(default)]
    pub name: String,

    /// Requested size, e.g. `1Gi`.
    pub storage: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Storage is never destroyed implicitly. Disabling the PVC only deletes
    /// the claim when this flag is set.
    #[serde(default)]
    pub force_delete: bool,
}

impl PvcConfig {
    /// The access modes to request, defaulting to single-writer when the
    /// list is empty or contains only unrecognized entries.
    pub fn effective_access_modes(&self) -> Vec<String> {
        let recognized: Vec<String> = self
            .access_modes
            .iter()
            .filter(|mode| {
                matches!(
                    mode.as_str(),
                    "ReadWriteOnce" | "ReadOnlyMany" | "ReadWriteMany" | "ReadWriteOncePod"
                )
            })
            .cloned()
            .collect();
        if recognized.is_empty() {
            vec![DEFAULT_ACCESS_MODE.to_string()]
        } else {
            recognized
        }
    }
}

/// A volume definition where the source kind is detected from whichever
/// field is set, so users do not have to name the type explicitly.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub config_map: Option<ConfigMapVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub secret: Option<SecretVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub empty_dir: Option<EmptyDirVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub host_path: Option<HostPathVolumeSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub nfs: Option<NFSVolumeSource>,
}

impl VolumeConfig {
    /// Convert to a Kubernetes `Volume`, picking the first configured source.
    /// Returns `None` when no source is set at all.
    pub fn to_volume(&self) -> Option<Volume> {
        let mut volume = Volume {
            name: self.name.clone(),
            ..Volume::default()
        };
        if let Some(pvc) = &self.persistent_volume_claim {
            volume.persistent_volume_claim = Some(pvc.clone());
        } else if let Some(config_map) = &self.config_map {
            volume.config_map = Some(config_map.clone());
        } else if let Some(secret) = &self.secret {
            volume.secret = Some(secret.clone());
        } else if let Some(empty_dir) = &self.empty_dir {
            volume.empty_dir = Some(empty_dir.clone());
        } else if let Some(host_path) = &self.host_path {
            volume.host_path = Some(host_path.clone());
        } else if let Some(nfs) = &self.nfs {
            volume.nfs = Some(nfs.clone());
        } else {
            tracing::debug!(volume = %self.name, "volume has no recognized source, skipping");
            return None;
        }
        Some(volume)
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountConfig {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl KubeApp {
    /// Child name tie-break: the child spec's explicit name if non-empty,
    /// otherwise the composite resource's name.
    pub fn deployment_name(&self) -> String {
        match &self.spec.deployment {
            Some(deployment) if !deployment.name.is_empty() => deployment.name.clone(),
            _ => self.name_any(),
        }
    }

    pub fn service_name(&self) -> String {
        match &self.spec.service {
            Some(service) if !service.name.is_empty() => service.name.clone(),
            _ => self.name_any(),
        }
    }

    pub fn ingress_name(&self) -> String {
        match self.spec.ingress.as_ref().and_then(|i| i.name.as_deref()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.name_any(),
        }
    }

    pub fn pvc_name(&self) -> String {
        match &self.spec.pvc {
            Some(pvc) if !pvc.name.is_empty() => pvc.name.clone(),
            _ => self.name_any(),
        }
    }

    /// Labels stamped onto every child resource: the composite's own labels
    /// overridden with the operator ownership marker.
    pub fn child_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels().clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_descriptor() {
        let app: KubeApp = serde_yaml::from_str(
            "
            apiVersion: apps.kube.com/v1alpha1
            kind: KubeApp
            metadata:
              name: shop-backend
              namespace: retail
            spec:
              enableDeployment: true
              enableService: true
              enableIngress: true
              enablePvc: true
              deployment:
                name: shop-backend
                image: registry.local/shop:v4
                replicas: 2
                ports:
                  - containerPort: 8080
                    name: http
                    protocol: TCP
                env:
                  - name: MODE
                    value: production
                volumes:
                  - name: data
                    persistentVolumeClaim:
                      claimName: shop-data
                volumeMounts:
                  - name: data
                    mountPath: /var/lib/shop
              service:
                name: shop-backend
                port: 80
                targetPort: 8080
                type: NodePort
              ingress:
                host: shop.example.com
                serviceName: shop-backend
                servicePort: 80
                pathType: Exact
              pvc:
                name: shop-data
                storage: 5Gi
                accessModes: [ReadWriteMany]
            ",
        )
        .unwrap();

        assert!(app.spec.enable_deployment);
        assert_eq!(app.deployment_name(), "shop-backend");
        // the ingress carries no explicit name, so the composite name wins
        assert_eq!(app.ingress_name(), "shop-backend");
        let deployment = app.spec.deployment.unwrap();
        assert_eq!(deployment.replicas, Some(2));
        assert_eq!(deployment.ports[0].container_port, 8080);
        assert_eq!(
            deployment.volumes[0]
                .to_volume()
                .unwrap()
                .persistent_volume_claim
                .unwrap()
                .claim_name,
            "shop-data"
        );
        let pvc = app.spec.pvc.unwrap();
        assert!(!pvc.force_delete, "forceDelete must default to protective");
        assert_eq!(pvc.effective_access_modes(), vec!["ReadWriteMany"]);
    }

    #[test]
    fn test_flag_defaults_are_off() {
        let app: KubeApp = serde_yaml::from_str(
            "
            apiVersion: apps.kube.com/v1alpha1
            kind: KubeApp
            metadata:
              name: bare
            spec: {}
            ",
        )
        .unwrap();
        assert!(!app.spec.enable_deployment);
        assert!(!app.spec.enable_service);
        assert!(!app.spec.enable_ingress);
        assert!(!app.spec.enable_pvc);
        assert_eq!(app.pvc_name(), "bare");
    }

    #[test]
    fn test_access_mode_defaulting() {
        let pvc = PvcConfig {
            access_modes: vec!["ReadWriteSometimes".to_string()],
            ..PvcConfig::default()
        };
        assert_eq!(pvc.effective_access_modes(), vec![DEFAULT_ACCESS_MODE]);

        let pvc = PvcConfig::default();
        assert_eq!(pvc.effective_access_modes(), vec![DEFAULT_ACCESS_MODE]);
    }

    #[test]
    fn test_volume_without_source_is_skipped() {
        let volume = VolumeConfig {
            name: "dangling".to_string(),
            ..VolumeConfig::default()
        };
        assert!(volume.to_volume().is_none());
    }
}
