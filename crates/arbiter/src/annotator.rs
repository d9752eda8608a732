//! Image identity derivation.

/// Identity fields attached to an image record when it is first observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    /// Platform identifier for the image
    pub image_id: String,
    /// Content-addressed digest used to query the Hub
    pub digest: String,
}

/// Produces identifying metadata for an image reference.
pub trait Annotator: Send + Sync {
    /// Derive the identity of the image known to the platform as `id` / `reference`.
    fn identify(&self, id: &str, reference: &str) -> ImageIdentity;
}

/// Derives the digest from the `@sha256:...` suffix of a pull reference,
/// falling back to the platform identifier for tag-only references.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestAnnotator;

impl Annotator for DigestAnnotator {
    fn identify(&self, id: &str, reference: &str) -> ImageIdentity {
        let digest = reference
            .rsplit_once('@')
            .map(|(_, digest)| digest)
            .filter(|digest| digest.contains(':'))
            .unwrap_or(id)
            .to_string();

        ImageIdentity {
            image_id: id.to_string(),
            digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_comes_from_pull_reference() {
        let identity = DigestAnnotator.identify(
            "sha256:aaaa",
            "172.30.1.1:5000/project/app@sha256:bbbb",
        );

        assert_eq!(identity.image_id, "sha256:aaaa");
        assert_eq!(identity.digest, "sha256:bbbb");
    }

    #[test]
    fn tag_reference_falls_back_to_id() {
        let identity = DigestAnnotator.identify("sha256:aaaa", "docker.io/library/nginx:1.25");
        assert_eq!(identity.digest, "sha256:aaaa");
    }

    #[test]
    fn malformed_digest_suffix_falls_back_to_id() {
        let identity = DigestAnnotator.identify("sha256:cccc", "registry/app@latest");
        assert_eq!(identity.digest, "sha256:cccc");
    }
}
