use super::*;
use loco_control_plane_core::intent::{Autoscaling, HealthCheck, Resources, Routing};
use loco_control_plane_core::DeploymentIntent;

fn ctx() -> DeploymentContext {
    ctx_with(|_| {})
}

fn ctx_with(f: impl FnOnce(&mut DeploymentIntent)) -> DeploymentContext {
    let mut intent = DeploymentIntent {
        name: "hello".to_string(),
        subdomain: "hello".to_string(),
        image: "registry.example.com/hello:v1".to_string(),
        env: maplit::btreemap! {
            "GREETING".to_string() => "hi".to_string(),
        },
        resources: Resources {
            cpu: "100m".to_string(),
            memory: "128Mi".to_string(),
        },
        health: HealthCheck {
            path: "/health".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            ..Default::default()
        },
        routing: Routing {
            port: 8080,
            ..Default::default()
        },
        ..Default::default()
    };
    f(&mut intent);
    DeploymentContext::new(intent, "alice", &Platform::default(), Utc::now())
        .expect("intent must be valid")
}

#[test]
fn namespace_is_exposed_via_gateway() {
    let ns = namespace(&ctx());
    assert_eq!(ns.metadata.name.as_deref(), Some("hello-alice"));
    let labels = ns.metadata.labels.expect("labels");
    assert_eq!(
        labels.get(labels::EXPOSE_VIA_GATEWAY).map(String::as_str),
        Some("true")
    );
    assert_eq!(
        labels.get(labels::INSTANCE).map(String::as_str),
        Some("hello-alice")
    );
}

#[test]
fn env_secret_is_opaque() {
    let ctx = ctx();
    let secret = env_secret(&ctx);
    assert_eq!(secret.metadata.namespace.as_deref(), Some("hello-alice"));
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    assert_eq!(
        secret.data,
        Some(maplit::btreemap! {
            "GREETING".to_string() => ByteString(b"hi".to_vec()),
        })
    );
}

#[test]
fn merges_env() {
    let mut secret = env_secret(&ctx());
    merge_env(
        &mut secret,
        &maplit::btreemap! {
            "GREETING".to_string() => "hello".to_string(),
            "PORT".to_string() => "8080".to_string(),
        },
    );
    assert_eq!(
        secret.data,
        Some(maplit::btreemap! {
            "GREETING".to_string() => ByteString(b"hello".to_vec()),
            "PORT".to_string() => ByteString(b"8080".to_vec()),
        })
    );
}

#[test]
fn registry_secret_holds_docker_config() {
    let secret = registry_secret(
        &ctx(),
        &RegistryCredentials {
            registry: "registry.gitlab.com".to_string(),
            username: "deploy".to_string(),
            password: "s3cret".to_string(),
            email: "alice@deploy-app.com".to_string(),
        },
    );
    assert_eq!(
        secret.metadata.name.as_deref(),
        Some("hello-registry-credentials")
    );
    assert_eq!(
        secret.type_.as_deref(),
        Some("kubernetes.io/dockerconfigjson")
    );

    let data = secret.data.expect("data");
    let ByteString(config) = data.get(".dockerconfigjson").expect("config");
    let config: serde_json::Value = serde_json::from_slice(config).expect("json");
    assert_eq!(
        config,
        serde_json::json!({
            "auths": {
                "registry.gitlab.com": {
                    "username": "deploy",
                    "password": "s3cret",
                    "email": "alice@deploy-app.com",
                    // base64("deploy:s3cret")
                    "auth": "ZGVwbG95OnMzY3JldA==",
                }
            }
        })
    );
}

#[test]
fn role_only_reads_env_secret() {
    let role = role(&ctx());
    let rules = role.rules.expect("rules");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].resources, Some(vec!["secrets".to_string()]));
    assert_eq!(rules[0].resource_names, Some(vec!["hello".to_string()]));
    assert_eq!(rules[0].verbs, vec!["get", "list", "watch"]);

    let binding = role_binding(&ctx());
    assert_eq!(binding.role_ref.name, "hello");
    let subjects = binding.subjects.expect("subjects");
    assert_eq!(subjects[0].kind, "ServiceAccount");
    assert_eq!(subjects[0].namespace.as_deref(), Some("hello-alice"));
}

#[test]
fn service_routes_port_80() {
    let spec = service(&ctx()).spec.expect("spec");
    assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
    assert_eq!(spec.session_affinity.as_deref(), Some("None"));
    assert_eq!(spec.session_affinity_config, None);
    assert_eq!(
        spec.selector,
        Some(maplit::btreemap! {
            labels::NAME.to_string() => "hello".to_string(),
        })
    );
    let port = &spec.ports.expect("ports")[0];
    assert_eq!(port.port, 80);
    assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
}

#[test]
fn deployment_is_locked_down() {
    let ctx = ctx();
    let spec = deployment(&ctx).spec.expect("spec");
    assert_eq!(spec.replicas, Some(1));
    assert_eq!(spec.revision_history_limit, Some(2));
    assert_eq!(spec.selector.match_labels, Some(ctx.selector()));

    let rolling = spec
        .strategy
        .and_then(|s| s.rolling_update)
        .expect("rolling update");
    assert_eq!(rolling.max_surge, Some(IntOrString::String("25%".to_string())));
    assert_eq!(
        rolling.max_unavailable,
        Some(IntOrString::String("25%".to_string()))
    );

    let template = spec.template;
    assert_eq!(
        template.metadata.as_ref().and_then(|m| m.labels.clone()),
        Some(ctx.labels.clone())
    );
    let pod = template.spec.expect("pod spec");
    assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
    assert_eq!(pod.service_account_name.as_deref(), Some("hello"));
    assert_eq!(pod.termination_grace_period_seconds, Some(60));
    assert_eq!(
        pod.image_pull_secrets,
        Some(vec![LocalObjectReference {
            name: "hello-registry-credentials".to_string(),
        }])
    );

    let container = &pod.containers[0];
    assert_eq!(
        container.resources,
        Some(resource_requirements("100m", "128Mi"))
    );
    let sc = container.security_context.as_ref().expect("security context");
    assert_eq!(sc.read_only_root_filesystem, Some(true));
    assert_eq!(sc.run_as_non_root, Some(true));
    assert_eq!(sc.allow_privilege_escalation, Some(false));

    let probe = container.liveness_probe.as_ref().expect("probe");
    assert_eq!(probe.period_seconds, Some(30));
    assert_eq!(probe.timeout_seconds, Some(5));
    assert_eq!(probe.failure_threshold, Some(3));
    assert_eq!(probe.success_threshold, Some(1));
    assert_eq!(
        probe.http_get.as_ref().and_then(|g| g.path.as_deref()),
        Some("/health")
    );
}

#[test]
fn deployment_annotates_metrics() {
    let ctx = ctx_with(|i| {
        i.observability.metrics.enabled = true;
        i.observability.metrics.path = "/metrics".to_string();
        i.observability.metrics.port = 9090;
    });
    let annotations = deployment(&ctx)
        .spec
        .and_then(|s| s.template.metadata)
        .and_then(|m| m.annotations)
        .expect("annotations");
    assert_eq!(
        annotations,
        maplit::btreemap! {
            "prometheus.io/scrape".to_string() => "true".to_string(),
            "prometheus.io/path".to_string() => "/metrics".to_string(),
            "prometheus.io/port".to_string() => "9090".to_string(),
        }
    );
}

#[test]
fn route_attaches_to_platform_gateway() {
    let platform = Platform::default();
    let route = http_route(&ctx(), &platform);
    assert_eq!(route.spec.hostnames, Some(vec!["hello.deploy-app.com".to_string()]));

    let parent = &route.spec.parent_refs.expect("parents")[0];
    assert_eq!(parent.name, "loco-gateway");
    assert_eq!(parent.namespace.as_deref(), Some("loco-system"));

    let rule = &route.spec.rules.expect("rules")[0];
    let path = rule.matches.as_ref().expect("matches")[0]
        .path
        .as_ref()
        .expect("path");
    assert_eq!(path.value.as_deref(), Some("/"));
    let backend = &rule.backend_refs.as_ref().expect("backends")[0];
    assert_eq!(backend.name, "hello");
    assert_eq!(backend.port, Some(80));
    assert_eq!(
        rule.timeouts.as_ref().and_then(|t| t.request.as_deref()),
        Some("30s")
    );
}

#[test]
fn autoscaler_only_when_enabled() {
    assert!(autoscaler(&ctx()).is_none());

    let ctx = ctx_with(|i| {
        i.replicas.max = 4;
        i.autoscaling = Autoscaling {
            enabled: true,
            cpu_target: None,
            memory_target: Some(60),
        };
    });
    let spec = autoscaler(&ctx).and_then(|a| a.spec).expect("autoscaler");
    assert_eq!(spec.scale_target_ref.kind, "Deployment");
    assert_eq!(spec.min_replicas, Some(1));
    assert_eq!(spec.max_replicas, 4);
    let resource = spec.metrics.expect("metrics")[0]
        .resource
        .clone()
        .expect("resource");
    assert_eq!(resource.name, "memory");
    assert_eq!(resource.target.average_utilization, Some(60));
}

#[test]
fn mutates_deployments() {
    let mut d = deployment(&ctx());

    set_image(&mut d, "registry.example.com/hello:v2");
    set_replicas(&mut d, 3);
    set_resources(&mut d, Some("200m"), None);
    let now = Utc::now();
    set_restarted_at(&mut d, now);

    let spec = d.spec.expect("spec");
    assert_eq!(spec.replicas, Some(3));
    let meta = spec.template.metadata.expect("template metadata");
    assert_eq!(
        meta.labels.and_then(|l| l.get(labels::VERSION).cloned()),
        Some("v2".to_string())
    );
    assert_eq!(
        meta.annotations
            .and_then(|a| a.get(labels::RESTARTED_AT).cloned()),
        Some(now.to_rfc3339())
    );
    let pod = spec.template.spec.expect("pod");
    let container = &pod.containers[0];
    assert_eq!(
        container.image.as_deref(),
        Some("registry.example.com/hello:v2")
    );
    assert_eq!(
        container.resources,
        Some(resource_requirements("200m", "128Mi"))
    );
}
