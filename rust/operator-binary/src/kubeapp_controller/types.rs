use stackable_operator::k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Service},
    networking::v1::Ingress,
};

/// Cluster-side state of the four child kinds, fetched once per pass.
#[derive(Debug, Default)]
pub struct FetchedChildState {
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub ingress: Option<Ingress>,
    pub pvc: Option<PersistentVolumeClaim>,
}

/// One step of a convergence pass. Delete variants carry the fetched object,
/// so a delete is only ever planned for a resource that was seen to exist.
#[derive(Debug)]
pub enum ClusterAction {
    CreateDeployment(Box<Deployment>),
    UpdateDeployment(Box<Deployment>),
    DeleteDeployment(Box<Deployment>),
    CreateService(Box<Service>),
    UpdateService(Box<Service>),
    DeleteService(Box<Service>),
    CreateIngress(Box<Ingress>),
    UpdateIngress(Box<Ingress>),
    DeleteIngress(Box<Ingress>),
    /// PVCs are applied with merge/patch semantics so size and storage-class
    /// changes can be reconciled where the platform supports it.
    ApplyPvc(Box<PersistentVolumeClaim>),
    DeletePvc(Box<PersistentVolumeClaim>),
    /// The PVC is disabled but `forceDelete` is not set. Storage is never
    /// destroyed implicitly, so the pass leaves the claim alone and warns.
    SkipProtectedPvc { name: String },
}

impl ClusterAction {
    /// Whether executing this action issues a mutating call against the
    /// cluster. A pass over unchanged state must plan zero of these.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ClusterAction::SkipProtectedPvc { .. })
    }
}
