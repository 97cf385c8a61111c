//! # CRD Validation Tests
//!
//! Sample resources parsed against the CRD types, and the generated
//! CustomResourceDefinitions checked for the fields tooling relies on.

use app_controller::crd::{
    App, FetchSource, Package, PackageMetadata, PackageRepository, TemplateStep,
};
use app_controller::controller::template::parse_steps;
use kube::CustomResourceExt;

#[test]
fn test_app_with_every_fetch_source() {
    let yaml = r#"
apiVersion: apps.octopilot.io/v1alpha1
kind: App
metadata:
  name: all-sources
  namespace: apps
spec:
  fetch:
  - inline:
      paths:
        config/values.yml: |
          replicas: 2
      pathsFrom:
      - secretRef:
          name: extra-values
          directoryPath: secrets
    path: inline
  - imgpkgBundle:
      image: registry.example.com/bundles/app
      tagSelection:
        semver:
          constraints: ">=1.0.0"
      secretRef:
        name: registry-creds
    path: bundle
  - image:
      url: registry.example.com/images/config:v3
      subPath: config
    path: image
  - http:
      url: https://example.com/releases/app.tgz
      sha256: 0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef
    path: http
  - git:
      url: https://github.com/example/app
      ref: v1.2.3
      lfsSkipSmudge: true
    path: git
  - helmChart:
      name: redis
      version: 17.0.0
      repository:
        url: https://charts.example.com
    path: chart
"#;

    let app: App = serde_yaml::from_str(yaml).expect("Should deserialize App with every source");
    let kinds: Vec<&str> = app
        .spec
        .fetch
        .iter()
        .map(|entry| FetchSource::try_from(entry).expect("Each entry sets one source").kind())
        .collect();
    assert_eq!(
        kinds,
        vec!["inline", "imgpkgBundle", "image", "http", "git", "helmChart"]
    );

    let inline = app.spec.fetch[0].inline.as_ref().unwrap();
    assert!(inline.paths.contains_key("config/values.yml"));
    assert_eq!(
        inline.paths_from[0]
            .secret_ref
            .as_ref()
            .and_then(|r| r.directory_path.as_deref()),
        Some("secrets")
    );
    assert_eq!(
        app.spec.fetch[1]
            .imgpkg_bundle
            .as_ref()
            .and_then(|b| b.tag_selection.as_ref())
            .and_then(|s| s.semver.as_ref())
            .and_then(|s| s.constraints.as_deref()),
        Some(">=1.0.0")
    );
    assert!(app.spec.fetch[4].git.as_ref().unwrap().lfs_skip_smudge);
}

#[test]
fn test_app_template_steps_in_order() {
    let yaml = r"
apiVersion: apps.octopilot.io/v1alpha1
kind: App
metadata:
  name: templated
  namespace: apps
spec:
  fetch:
  - git:
      url: https://github.com/example/app
  template:
  - helmTemplate:
      path: chart
      valuesFiles: [values/prod.yml]
      inlineValues:
      - name: image.tag
        value: v2
  - ytt:
      paths: ['-', config/overlays]
      inlineValues:
      - name: env
        value: prod
      ignoreUnknownComments: true
  - kustomize:
      path: overlays/prod
  - kbld: {}
";

    let app: App = serde_yaml::from_str(yaml).expect("Should deserialize templated App");
    let steps = parse_steps(&app.spec.template).expect("Each step sets one tool");
    assert_eq!(steps.len(), 4);
    assert!(matches!(steps[0], TemplateStep::HelmTemplate(_)));
    assert!(matches!(steps[1], TemplateStep::Ytt(ref ytt) if ytt.ignore_unknown_comments));
    assert!(matches!(steps[2], TemplateStep::Kustomize(_)));
    assert!(matches!(steps[3], TemplateStep::Kbld(_)));
}

#[test]
fn test_app_missing_fetch_is_rejected() {
    let yaml = r"
apiVersion: apps.octopilot.io/v1alpha1
kind: App
metadata:
  name: broken
spec:
  syncPeriod: 5m
";
    let result: Result<App, _> = serde_yaml::from_str(yaml);
    assert!(result.is_err(), "spec.fetch is required");
}

#[test]
fn test_package_repository_sample() {
    let yaml = r"
apiVersion: packaging.octopilot.io/v1alpha1
kind: PackageRepository
metadata:
  name: core
  namespace: packages
spec:
  syncPeriod: 10m
  fetch:
    imgpkgBundle:
      image: registry.example.com/packages/core
      tagSelection:
        semver: {}
";

    let repository: PackageRepository =
        serde_yaml::from_str(yaml).expect("Should deserialize PackageRepository");
    assert_eq!(repository.spec.sync_period.as_deref(), Some("10m"));
    assert!(!repository.spec.paused);
    let source = FetchSource::try_from(&repository.spec.fetch).unwrap();
    assert_eq!(source.kind(), "imgpkgBundle");
}

#[test]
fn test_package_documents_sample() {
    let package: Package = serde_yaml::from_str(
        r"
apiVersion: data.packaging.octopilot.io/v1alpha1
kind: Package
metadata:
  name: redis.example.com.17.0.0
spec:
  refName: redis.example.com
  version: 17.0.0
  releaseNotes: Initial release
  template:
    spec:
      fetch:
      - helmChart:
          name: redis
      deploy:
        kapp:
          intoNs: redis
",
    )
    .expect("Should deserialize Package");
    assert_eq!(package.spec.ref_name, "redis.example.com");
    assert_eq!(
        package.spec.template.spec.deploy.kapp.into_ns.as_deref(),
        Some("redis")
    );

    let metadata: PackageMetadata = serde_yaml::from_str(
        r"
apiVersion: data.packaging.octopilot.io/v1alpha1
kind: PackageMetadata
metadata:
  name: redis.example.com
spec:
  displayName: Redis
  providerName: Example
  maintainers:
  - name: Jane Example
  categories: [database]
",
    )
    .expect("Should deserialize PackageMetadata");
    assert_eq!(metadata.spec.display_name.as_deref(), Some("Redis"));
    assert_eq!(metadata.spec.maintainers.len(), 1);
}

#[test]
fn test_generated_crds_carry_status_subresource_and_columns() {
    for crd in [App::crd(), PackageRepository::crd()] {
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(
            version
                .subresources
                .as_ref()
                .is_some_and(|s| s.status.is_some()),
            "{} needs a status subresource",
            crd.spec.names.kind
        );
        let columns: Vec<&str> = version
            .additional_printer_columns
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert!(columns.contains(&"Description"));
    }

    assert_eq!(PackageRepository::crd().spec.group, "packaging.octopilot.io");
    assert_eq!(Package::crd().spec.group, "data.packaging.octopilot.io");
    assert_eq!(PackageMetadata::crd().spec.group, "data.packaging.octopilot.io");
}
