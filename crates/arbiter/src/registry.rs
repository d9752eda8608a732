//! Platform image inventory.
//!
//! OpenShift keeps one cluster-scoped `image.openshift.io/v1` `Image` object
//! per image pushed to or imported into the integrated registry. There is no
//! typed binding for it in `k8s-openapi`, so it is read as a
//! [`DynamicObject`].

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, info};

use crate::error::Result;

/// An image as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformImage {
    /// Platform identifier
    pub id: String,
    /// Pull reference (unique key for the arbiter)
    pub reference: String,
}

/// Read-only view of the images currently known to the platform.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// List every image the platform knows about.
    async fn list_images(&self) -> Result<Vec<PlatformImage>>;
}

/// OpenShift Image API resource definition.
pub(crate) fn openshift_image_api() -> ApiResource {
    ApiResource {
        group: "image.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "image.openshift.io/v1".to_string(),
        kind: "Image".to_string(),
        plural: "images".to_string(),
    }
}

/// Extract the identifier and pull reference from an OpenShift `Image`.
///
/// The identifier is `dockerImageMetadata.Id`, falling back to the object
/// name (the image digest). Objects without `dockerImageReference` are
/// skipped.
pub(crate) fn image_from_object(object: &DynamicObject) -> Option<PlatformImage> {
    let Some(reference) = object
        .data
        .get("dockerImageReference")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
    else {
        debug!(
            name = ?object.metadata.name,
            "Skipping image without dockerImageReference"
        );
        return None;
    };

    let id = object
        .data
        .get("dockerImageMetadata")
        .and_then(|m| m.get("Id"))
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .or_else(|| object.metadata.name.clone())?;

    Some(PlatformImage {
        id,
        reference: reference.to_string(),
    })
}

/// Lists OpenShift images through the Kubernetes API.
#[derive(Clone)]
pub struct KubeImageRegistry {
    client: Client,
}

impl KubeImageRegistry {
    /// Create a registry adapter over `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &openshift_image_api())
    }
}

#[async_trait]
impl ImageRegistry for KubeImageRegistry {
    async fn list_images(&self) -> Result<Vec<PlatformImage>> {
        let list = self.api().list(&ListParams::default()).await?;

        let images: Vec<PlatformImage> = list.items.iter().filter_map(image_from_object).collect();
        info!(
            listed = list.items.len(),
            usable = images.len(),
            "Listed platform images"
        );
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_object(name: &str, data: serde_json::Value) -> DynamicObject {
        DynamicObject::new(name, &openshift_image_api()).data(data)
    }

    #[test]
    fn parses_reference_and_metadata_id() {
        let object = image_object(
            "sha256:abc",
            json!({
                "dockerImageReference": "172.30.1.1:5000/demo/app@sha256:abc",
                "dockerImageMetadata": { "Id": "sha256:def" }
            }),
        );

        assert_eq!(
            image_from_object(&object),
            Some(PlatformImage {
                id: "sha256:def".to_string(),
                reference: "172.30.1.1:5000/demo/app@sha256:abc".to_string(),
            })
        );
    }

    #[test]
    fn falls_back_to_object_name_for_id() {
        let object = image_object(
            "sha256:abc",
            json!({ "dockerImageReference": "registry/app@sha256:abc" }),
        );

        assert_eq!(image_from_object(&object).unwrap().id, "sha256:abc");
    }

    #[test]
    fn skips_objects_without_reference() {
        let object = image_object("sha256:abc", json!({ "dockerImageMetadata": { "Id": "x" } }));
        assert!(image_from_object(&object).is_none());

        let object = image_object("sha256:abc", json!({ "dockerImageReference": "" }));
        assert!(image_from_object(&object).is_none());
    }

    #[test]
    fn image_api_targets_openshift_group() {
        let api = openshift_image_api();
        assert_eq!(api.api_version, "image.openshift.io/v1");
        assert_eq!(api.plural, "images");
    }
}
