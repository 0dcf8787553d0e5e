//! End-to-end routing scenarios over a SKILL.md tree on disk.

use caproute::audit::AuditConfig;
use caproute::{
    load_tree, AuditEntry, Config, Context, Handler, HandlerOutput, RouteError, Router,
    TaskRequest,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn write_skill(root: &Path, rel: &str, frontmatter: &str, body: &str) {
    let dir = root.join(rel);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("SKILL.md"),
        format!("---\n{}---\n\n{}\n", frontmatter, body),
    )
    .unwrap();
}

fn write_devops_tree(root: &Path) {
    write_skill(
        root,
        "devops",
        "name: devops\ndescription: infra work\ntriggers:\n  - kind: keyword\n    pattern: terraform\n    weight: 10\n",
        "",
    );
    write_skill(
        root,
        "devops/terraform-handler",
        "name: terraform-handler\ndescription: terraform modules\nhandler: doc\n",
        "Use modules for shared infrastructure.",
    );
}

fn config_with_audit(audit_path: &Path) -> Config {
    Config {
        audit: AuditConfig {
            path: Some(audit_path.to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn read_entries(path: &Path) -> Vec<AuditEntry> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn trigger_match_routes_with_full_confidence() {
    let tmp = tempfile::tempdir().unwrap();
    write_devops_tree(tmp.path());
    let loaded = load_tree(tmp.path()).unwrap();
    loaded.registry.validate().unwrap();

    let audit_path = tmp.path().join("audit.ndjson");
    let router = Router::new(
        loaded.registry,
        Arc::new(loaded.handlers),
        &config_with_audit(&audit_path),
    )
    .unwrap();

    let report = router
        .route_and_dispatch(&TaskRequest::new("help me write a terraform module"))
        .unwrap();
    assert_eq!(
        report.path,
        vec!["root", "devops", "devops/terraform-handler"]
    );
    assert_eq!(report.confidence, 1.0);
    assert_eq!(
        report.payload["instructions"],
        "Use modules for shared infrastructure."
    );
}

#[test]
fn unmatched_request_falls_back_with_reduced_confidence() {
    let tmp = tempfile::tempdir().unwrap();
    write_devops_tree(tmp.path());
    // A second top-level skill so the root level is a real decision
    write_skill(
        tmp.path(),
        "ml",
        "name: ml\ndescription: machine learning\nhandler: doc\ntriggers:\n  - kind: keyword\n    pattern: rag\n    weight: 5\n",
        "ML notes.",
    );
    let loaded = load_tree(tmp.path()).unwrap();

    let router = Router::new(
        loaded.registry,
        Arc::new(loaded.handlers),
        &config_with_audit(&tmp.path().join("audit.ndjson")),
    )
    .unwrap();

    let report = router
        .route_and_dispatch(&TaskRequest::new("what's the weather"))
        .unwrap();
    // Single fallback step at the root, then structural delegation to the leaf
    assert_eq!(
        report.path,
        vec!["root", "devops", "devops/terraform-handler"]
    );
    assert!((report.confidence - 0.3).abs() < 1e-9);
    assert_eq!(report.fallback_steps, 1);
}

#[test]
fn no_fallback_policy_yields_no_match() {
    let tmp = tempfile::tempdir().unwrap();
    write_devops_tree(tmp.path());
    let loaded = load_tree(tmp.path()).unwrap();

    let mut config = config_with_audit(&tmp.path().join("audit.ndjson"));
    config.resolver.fallback_to_first = false;
    let audit_path = tmp.path().join("audit.ndjson");
    {
        let router = Router::new(loaded.registry, Arc::new(loaded.handlers), &config).unwrap();
        let err = router
            .route_and_dispatch(&TaskRequest::new("what's the weather"))
            .unwrap_err();
        match err {
            RouteError::Resolve(e) => assert_eq!(e.path(), ["root".to_string()]),
            other => panic!("expected resolve error, got {:?}", other),
        }
    }
    let entries = read_entries(&audit_path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome.label(), "no_match");
    assert_eq!(entries[0].confidence, 0.0);
}

#[test]
fn near_tie_is_recorded_as_alternative() {
    let tmp = tempfile::tempdir().unwrap();
    // Two siblings scoring 0.82 and 0.80 on the same request
    write_skill(
        tmp.path(),
        "infra",
        "name: infra\ndescription: a\nhandler: doc\ntriggers:\n  - kind: keyword\n    pattern: docker\n    weight: 82\n  - kind: keyword\n    pattern: zzz-never\n    weight: 18\n",
        "",
    );
    write_skill(
        tmp.path(),
        "platform",
        "name: platform\ndescription: b\nhandler: doc\ntriggers:\n  - kind: keyword\n    pattern: docker\n    weight: 80\n  - kind: keyword\n    pattern: yyy-never\n    weight: 20\n",
        "",
    );
    let loaded = load_tree(tmp.path()).unwrap();

    let router = Router::new(
        loaded.registry,
        Arc::new(loaded.handlers),
        &config_with_audit(&tmp.path().join("audit.ndjson")),
    )
    .unwrap();

    let report = router
        .route_and_dispatch(&TaskRequest::new("docker cleanup"))
        .unwrap();
    assert_eq!(report.path, vec!["root", "infra"]);
    assert_eq!(report.alternatives.len(), 1);
    assert_eq!(report.alternatives[0].id, "platform");
    assert!((report.alternatives[0].score - 0.80).abs() < 1e-9);
}

struct BlockingHandler;
impl Handler for BlockingHandler {
    fn invoke(&self, _ctx: &Context) -> anyhow::Result<HandlerOutput> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(HandlerOutput::new("blocking", json!({})))
    }
}

#[test]
fn timeout_records_exactly_one_audit_entry() {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(
        tmp.path(),
        "slow",
        "name: slow\ndescription: slow external agent\nhandler: blocking\ntriggers:\n  - kind: keyword\n    pattern: simulate\n    weight: 1\n",
        "",
    );
    let loaded = load_tree(tmp.path()).unwrap();
    loaded.handlers.insert("blocking", BlockingHandler);

    let mut config = config_with_audit(&tmp.path().join("audit.ndjson"));
    config.dispatch.timeout_ms = 50;
    let audit_path = tmp.path().join("audit.ndjson");
    {
        let router = Router::new(loaded.registry, Arc::new(loaded.handlers), &config).unwrap();
        let err = router
            .route_and_dispatch(&TaskRequest::new("simulate a long run"))
            .unwrap_err();
        assert!(matches!(
            err,
            RouteError::Dispatch {
                source: caproute::DispatchError::Timeout { timeout_ms: 50 },
                ..
            }
        ));
    }
    let entries = read_entries(&audit_path);
    assert_eq!(entries.len(), 1, "no duplicate entries, no missing entry");
    assert_eq!(entries[0].outcome.label(), "timeout");
    assert_eq!(entries[0].path, vec!["root", "slow"]);
}

#[test]
fn hints_short_circuit_the_walk() {
    let tmp = tempfile::tempdir().unwrap();
    write_devops_tree(tmp.path());
    write_skill(
        tmp.path(),
        "ml",
        "name: ml\ndescription: machine learning\nhandler: doc\nhints:\n  domain: ml\n",
        "ML notes.",
    );
    let loaded = load_tree(tmp.path()).unwrap();

    let router = Router::new(
        loaded.registry,
        Arc::new(loaded.handlers),
        &config_with_audit(&tmp.path().join("audit.ndjson")),
    )
    .unwrap();

    let report = router
        .route_and_dispatch(&TaskRequest::new("do something unrelated").with_hint("domain", "ml"))
        .unwrap();
    assert_eq!(report.path, vec!["root", "ml"]);
    assert_eq!(report.confidence, 1.0);
}
