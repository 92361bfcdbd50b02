//! Turns a stored descriptor template plus a ticket's overrides into a
//! complete composite resource. Decoding is a single typed, validating
//! step; a structurally broken template is rejected outright.

use kubeapp_crd::{KubeApp, KubeAppSpec};
use snafu::{ensure, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::models::{Request, Template};

/// Replica count used when the ticket carries no positive value.
pub const TEMPLATE_REPLICAS: i32 = 3;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("template [{name}] is not a valid composite descriptor"))]
    DecodeTemplate {
        source: serde_json::Error,
        name: String,
    },
    #[snafu(display("template [{name}] enables a deployment but carries no deployment spec"))]
    TemplateWithoutDeployment { name: String },
    #[snafu(display("ticket names no service to deploy as"))]
    MissingServiceName,
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Decode the stored template body into the typed descriptor schema.
pub fn decode_template(template: &Template) -> Result<KubeAppSpec> {
    serde_json::from_value(template.content.clone()).context(DecodeTemplateSnafu {
        name: template.name.clone(),
    })
}

/// Build the composite resource for a CREATE dispatch: the template supplies
/// the descriptor body, the ticket supplies name, namespace, image and
/// replica count.
pub fn build_kubeapp(request: &Request, template: &Template) -> Result<KubeApp> {
    ensure!(!request.service_name.is_empty(), MissingServiceNameSnafu);
    let mut spec = decode_template(template)?;

    if spec.enable_deployment {
        let deployment = spec
            .deployment
            .as_mut()
            .ok_or_else(|| Error::TemplateWithoutDeployment {
                name: template.name.clone(),
            })?;
        if !request.image.is_empty() {
            deployment.image = request.image.clone();
        }
        deployment.replicas = Some(effective_replicas(request.replicas));
    }

    let mut app = KubeApp::new(&request.service_name, spec);
    app.metadata.namespace = Some(request.business_line.clone());
    Ok(app)
}

fn effective_replicas(requested: i32) -> i32 {
    if requested > 0 {
        requested
    } else {
        TEMPLATE_REPLICAS
    }
}

/// Merge patch for an UPDATE dispatch: only the deployment child's image
/// and replica count change, every other field is untouched.
pub fn deployment_override_patch(image: &str, replicas: i32) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "deployment": {
                "image": image,
                "replicas": effective_replicas(replicas),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::approval::models::{Operation, RequestStatus};

    fn template(content: serde_json::Value) -> Template {
        Template {
            id: 7,
            name: "web-baseline".to_string(),
            content,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request(replicas: i32) -> Request {
        Request {
            id: 1,
            request_id: Uuid::new_v4(),
            applicant: "zhang".to_string(),
            business_line: "retail".to_string(),
            service_name: "shop".to_string(),
            image: "registry.local/shop:v5".to_string(),
            replicas,
            template_id: 7,
            purpose: "rollout".to_string(),
            operation: Operation::Create,
            status: RequestStatus::K8sApproved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn baseline_content() -> serde_json::Value {
        serde_json::json!({
            "enableDeployment": true,
            "enableService": true,
            "deployment": {
                "name": "",
                "image": "registry.local/shop:v1",
                "replicas": 2
            },
            "service": {
                "name": "",
                "port": 80,
                "targetPort": 8080
            }
        })
    }

    #[test]
    fn test_ticket_overrides_image_and_replicas() {
        let app = build_kubeapp(&request(5), &template(baseline_content())).unwrap();
        let deployment = app.spec.deployment.unwrap();
        assert_eq!(deployment.image, "registry.local/shop:v5");
        assert_eq!(deployment.replicas, Some(5));
        assert_eq!(app.metadata.name.as_deref(), Some("shop"));
        assert_eq!(app.metadata.namespace.as_deref(), Some("retail"));
    }

    #[test]
    fn test_replicas_default_to_three_on_template_path() {
        let app = build_kubeapp(&request(0), &template(baseline_content())).unwrap();
        assert_eq!(app.spec.deployment.unwrap().replicas, Some(3));
    }

    #[test]
    fn test_structurally_broken_template_is_rejected() {
        let content = serde_json::json!({
            "enableDeployment": true,
            "deployment": {
                "image": "registry.local/shop:v1",
                "replicas": "two"
            }
        });
        let error = build_kubeapp(&request(1), &template(content)).unwrap_err();
        assert!(matches!(error, Error::DecodeTemplate { .. }));
    }

    #[test]
    fn test_enabled_deployment_without_spec_is_rejected() {
        let content = serde_json::json!({ "enableDeployment": true });
        let error = build_kubeapp(&request(1), &template(content)).unwrap_err();
        assert!(matches!(error, Error::TemplateWithoutDeployment { .. }));
    }

    #[test]
    fn test_update_patch_touches_only_image_and_replicas() {
        let patch = deployment_override_patch("registry.local/shop:v6", 0);
        assert_eq!(
            patch,
            serde_json::json!({
                "spec": {"deployment": {"image": "registry.local/shop:v6", "replicas": 3}}
            })
        );
    }
}
