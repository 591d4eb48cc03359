//! Probe specification
//!
//! Derives how a route is probed from its spec and annotations. The
//! derivation is a pure function of the route and is recomputed on every
//! probe; nothing here is cached.

use crate::cluster::Route;

/// Annotation that disables probing when set to a true boolean
pub const ANNOTATION_SKIP: &str = "thobits.com/ormon-skip";
/// Annotation overriding the request method
pub const ANNOTATION_METHOD: &str = "thobits.com/ormon-method";
/// Annotation listing accepted status codes, comma separated
///
/// Whitespace around each entry is ignored, so `200, 301` accepts both codes.
pub const ANNOTATION_VALID_STATUS_CODES: &str = "thobits.com/ormon-valid-statuscodes";
/// Annotation holding a pattern the response body must match
pub const ANNOTATION_BODY_REGEX: &str = "thobits.com/ormon-body-regex";

/// Paths served to ACME validators; never probed
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_STATUS_CODE: &str = "200";

/// How one route is probed, plus the identifiers used to label its samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSpec {
    pub skip: bool,

    pub ssl: bool,
    pub host: String,
    pub proto: &'static str,
    pub path: String,
    /// `{proto}://{host}`; the route path is carried for labels only
    pub url: String,

    pub method: String,
    pub valid_status_codes: Vec<String>,
    /// Empty pattern matches every body
    pub body_regex: String,

    pub cluster: String,
    pub uid: String,
    pub namespace: String,
    pub name: String,
}

impl ProbeSpec {
    /// Derive the probe specification of a route
    pub fn from_route(route: &Route) -> Self {
        let annotation = |key: &str| route.annotations.get(key).map(String::as_str);

        let ssl = route.tls;
        let proto = if ssl { "https" } else { "http" };

        let skip = route.path.starts_with(ACME_CHALLENGE_PREFIX)
            || annotation(ANNOTATION_SKIP).is_some_and(parse_bool);

        let method = annotation(ANNOTATION_METHOD)
            .map(str::to_uppercase)
            .unwrap_or_else(|| DEFAULT_METHOD.to_string());

        let valid_status_codes = match annotation(ANNOTATION_VALID_STATUS_CODES) {
            Some(codes) => codes.split(',').map(|code| code.trim().to_string()).collect(),
            None => vec![DEFAULT_STATUS_CODE.to_string()],
        };

        let body_regex = annotation(ANNOTATION_BODY_REGEX)
            .unwrap_or_default()
            .to_string();

        Self {
            skip,
            ssl,
            host: route.host.clone(),
            proto,
            path: route.path.clone(),
            url: format!("{proto}://{}", route.host),
            method,
            valid_status_codes,
            body_regex,
            cluster: route.cluster.clone(),
            uid: route.uid.clone(),
            namespace: route.namespace.clone(),
            name: route.name.clone(),
        }
    }

    /// Whether `status` is one of the accepted status codes (exact string match)
    pub fn accepts_status(&self, status: &str) -> bool {
        self.valid_status_codes.iter().any(|code| code == status)
    }
}

/// Boolean parsing with the usual `1/t/true` spellings; anything unparsable is false
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route_with(path: &str, annotations: &[(&str, &str)]) -> Route {
        Route {
            cluster: "c1".to_string(),
            namespace: "prod".to_string(),
            name: "svc".to_string(),
            uid: "3f2a".to_string(),
            host: "svc.example.com".to_string(),
            path: path.to_string(),
            tls: false,
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_defaults_without_annotations() {
        let spec = ProbeSpec::from_route(&route_with("/api", &[]));
        assert!(!spec.skip);
        assert!(!spec.ssl);
        assert_eq!(spec.proto, "http");
        assert_eq!(spec.method, "GET");
        assert_eq!(spec.valid_status_codes, vec!["200"]);
        assert!(spec.body_regex.is_empty());
        assert_eq!(spec.cluster, "c1");
        assert_eq!(spec.uid, "3f2a");
        assert_eq!(spec.namespace, "prod");
        assert_eq!(spec.name, "svc");
    }

    #[test]
    fn test_url_omits_route_path() {
        let spec = ProbeSpec::from_route(&route_with("/api/v1", &[]));
        assert_eq!(spec.url, "http://svc.example.com");
        assert_eq!(spec.path, "/api/v1");
    }

    #[test]
    fn test_tls_route_uses_https() {
        let mut route = route_with("", &[]);
        route.tls = true;
        let spec = ProbeSpec::from_route(&route);
        assert!(spec.ssl);
        assert_eq!(spec.proto, "https");
        assert_eq!(spec.url, "https://svc.example.com");
    }

    #[test]
    fn test_acme_challenge_path_is_skipped() {
        let spec = ProbeSpec::from_route(&route_with("/.well-known/acme-challenge/token", &[]));
        assert!(spec.skip);
    }

    #[test]
    fn test_acme_challenge_skip_wins_over_annotation() {
        let spec = ProbeSpec::from_route(&route_with(
            "/.well-known/acme-challenge/token",
            &[(ANNOTATION_SKIP, "false")],
        ));
        assert!(spec.skip);
    }

    #[test]
    fn test_skip_annotation_boolean_spellings() {
        for value in ["1", "t", "T", "true", "TRUE", "True"] {
            let spec = ProbeSpec::from_route(&route_with("/", &[(ANNOTATION_SKIP, value)]));
            assert!(spec.skip, "{value} should skip");
        }
        for value in ["0", "false", "no", "yes", ""] {
            let spec = ProbeSpec::from_route(&route_with("/", &[(ANNOTATION_SKIP, value)]));
            assert!(!spec.skip, "{value} should not skip");
        }
    }

    #[test]
    fn test_method_annotation_is_upper_cased() {
        let spec = ProbeSpec::from_route(&route_with("/", &[(ANNOTATION_METHOD, "head")]));
        assert_eq!(spec.method, "HEAD");
    }

    #[test]
    fn test_valid_status_codes_annotation() {
        let spec = ProbeSpec::from_route(&route_with(
            "/",
            &[(ANNOTATION_VALID_STATUS_CODES, "200, 301,404")],
        ));
        assert_eq!(spec.valid_status_codes, vec!["200", "301", "404"]);
        assert!(spec.accepts_status("301"));
        assert!(spec.accepts_status("404"));
        assert!(!spec.accepts_status("500"));
        assert!(!spec.accepts_status("2xx"));
    }

    #[test]
    fn test_body_regex_annotation() {
        let spec = ProbeSpec::from_route(&route_with("/", &[(ANNOTATION_BODY_REGEX, "^ok$")]));
        assert_eq!(spec.body_regex, "^ok$");
    }

    proptest! {
        #[test]
        fn acme_paths_always_skip(
            suffix in "[a-zA-Z0-9_-]{0,32}",
            skip in proptest::option::of("[a-zA-Z0-9]{0,6}"),
        ) {
            let path = format!("{ACME_CHALLENGE_PREFIX}{suffix}");
            let annotations: Vec<(&str, &str)> = skip
                .as_deref()
                .map(|value| vec![(ANNOTATION_SKIP, value)])
                .unwrap_or_default();
            let spec = ProbeSpec::from_route(&route_with(&path, &annotations));
            prop_assert!(spec.skip);
        }

        #[test]
        fn derivation_is_idempotent(
            path in "(/[a-z]{0,8}){0,3}",
            method in "[a-zA-Z]{1,8}",
            codes in "[0-9]{3}(,[0-9]{3}){0,3}",
            tls in any::<bool>(),
        ) {
            let mut route = route_with(
                &path,
                &[
                    (ANNOTATION_METHOD, method.as_str()),
                    (ANNOTATION_VALID_STATUS_CODES, codes.as_str()),
                ],
            );
            route.tls = tls;
            prop_assert_eq!(ProbeSpec::from_route(&route), ProbeSpec::from_route(&route));
        }
    }
}
