// Adapted from: https://github.com/kubernetes/client-go/blob/ca4a13f6dec7cb79cfd85df0ab3d7cfd05c5c5e9/rest/request.go#L526C1-L605C2
//
// Collapses a concrete API-server request path into a template so that a
// metrics label doesn't carry one series per distinct resource name.
pub fn template_path(path: &str, base_path: Option<&str>) -> String {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut trimmed_base_path = String::new();

    if let Some(base) = base_path {
        if path.starts_with(base) {
            let p = path.trim_start_matches(base);
            trimmed_base_path = base.to_string();
            segments = p.split('/').filter(|s| !s.is_empty()).collect();
        }
    };

    if segments.len() <= 2 {
        return path.to_owned();
    };

    const CORE_GROUP_PREFIX: &str = "api";
    const NAMED_GROUP_PREFIX: &str = "apis";
    let index = match segments[0] {
        CORE_GROUP_PREFIX => 2,
        NAMED_GROUP_PREFIX => 3,
        _ => return "/{prefix}".to_owned(),
    };

    match segments.len() - index {
        1 => {}
        2 => {
            segments[index + 1] = "{name}";
        }
        3 => {
            if segments[index + 2] == "finalize" || segments[index + 2] == "status" {
                segments[index + 1] = "{name}";
            } else {
                segments[index + 1] = "{namespace}";
            }
        }
        _ => {
            segments[index + 1] = "{namespace}";
            if segments[index + 3] != "finalize" && segments[index + 3] != "status" {
                segments[index + 3] = "{name}";
            }
        }
    }

    format!(
        "{}/{}",
        trimmed_base_path.trim_end_matches('/'),
        segments.join("/")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_segments() {
        assert_eq!(template_path("/", None), "/");
    }

    #[test]
    fn test_core_group_with_name() {
        assert_eq!(
            template_path("/api/v1/pods/mypod", None),
            "/api/v1/pods/{name}"
        );
    }

    #[test]
    fn test_named_group_with_namespace() {
        assert_eq!(
            template_path(
                "/apis/apps/v1/namespaces/mynamespace/deployments/mydeployment",
                None
            ),
            "/apis/apps/v1/namespaces/{namespace}/deployments/{name}"
        );
    }

    #[test]
    fn test_named_group_model_crd() {
        assert_eq!(
            template_path(
                "/apis/inference.llmkube.ai/v1alpha1/namespaces/default/models/llama-3",
                None
            ),
            "/apis/inference.llmkube.ai/v1alpha1/namespaces/{namespace}/models/{name}"
        );
    }

    #[test]
    fn test_with_status_subresource() {
        assert_eq!(
            template_path(
                "/apis/inference.llmkube.ai/v1alpha1/namespaces/default/inferenceservices/svc/status",
                None
            ),
            "/apis/inference.llmkube.ai/v1alpha1/namespaces/{namespace}/inferenceservices/{name}/status"
        );
    }

    #[test]
    fn test_prefix_fallback() {
        assert_eq!(template_path("/unknown/group/resource", None), "/{prefix}");
    }

    #[test]
    fn test_trimmed_base_path() {
        assert_eq!(
            template_path("/base/path/api/v1/pods/mypod", Some("/base/path")),
            "/base/path/api/v1/pods/{name}"
        );
    }

    #[test]
    fn test_full_path_without_namespace_and_name() {
        assert_eq!(
            template_path("/some/base/url/path/api/v1/r1", Some("/some/base/url/path")),
            "/some/base/url/path/api/v1/r1"
        );
    }
}
