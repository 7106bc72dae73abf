// Integration tests for the terminate (delicense) path
// IMPORTANT: every collaborator is the in-memory mock backend

mod common;

use common::{
    controller, event_json, firewall, orchestrator, record, secret, terminate_settings,
    SECRET_REF, TERMINATE,
};
use vmseries_common::{ConfigError, LifecycleActionResult, LifecycleError};
use vmseries_lifecycle::CompletionOutcome;
use vmseries_providers::mock::{MockCloud, MockController, MockFaults, RecordedCall};
use vmseries_providers::panorama::ControllerCommand;

const HA_QUERY: &str = "show high-availability state";

fn list_command() -> String {
    ControllerCommand::ListDevices {
        license_manager: "lm-1".to_string(),
    }
    .to_command_string()
}

fn deactivate_command(serial: &str) -> String {
    ControllerCommand::Deactivate {
        license_manager: "lm-1".to_string(),
        serial: serial.to_string(),
    }
    .to_command_string()
}

fn commit(host: &str) -> RecordedCall {
    RecordedCall::Commit {
        hostname: host.to_string(),
        admins: "__sw_fw_license".to_string(),
        sync: false,
    }
}

fn single_controller_cloud(mgmt_ip: Option<&str>, ctrl: MockController) -> MockCloud {
    MockCloud::new()
        .with_instance("i-2", firewall("us-east-1a", mgmt_ip))
        .with_secret(SECRET_REF, secret(None))
        .with_controller("pano-1", ctrl)
}

#[tokio::test]
async fn test_matching_record_is_deactivated_and_committed() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![
            record(Some("10.0.0.7"), Some("S1")),
            record(Some("10.0.0.8"), Some("S2")),
        ]),
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert_eq!(cloud.deactivated_serials(), vec!["S1".to_string()]);
    assert_eq!(
        cloud.controller_commands("pano-1"),
        vec![list_command(), deactivate_command("S1")]
    );
    assert_eq!(report.completion, CompletionOutcome::Signaled);
    assert_eq!(
        cloud.calls(),
        vec![
            RecordedCall::ListInterfaces {
                instance_id: "i-2".to_string(),
            },
            RecordedCall::InterfaceIp {
                instance_id: "i-2".to_string(),
                device_index: 1,
            },
            RecordedCall::GetSecret {
                reference: SECRET_REF.to_string(),
            },
            RecordedCall::Connect {
                hostname: "pano-1".to_string(),
            },
            RecordedCall::ControllerOp {
                hostname: "pano-1".to_string(),
                command: list_command(),
            },
            RecordedCall::ControllerOp {
                hostname: "pano-1".to_string(),
                command: deactivate_command("S1"),
            },
            commit("pano-1"),
            RecordedCall::CompleteLifecycle {
                hook_name: "hook-a".to_string(),
                group_name: "asg-fw".to_string(),
                action_token: "tok-1".to_string(),
                result: LifecycleActionResult::Continue,
            },
        ]
    );
}

#[tokio::test]
async fn test_no_matching_record_makes_no_changes() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![record(Some("10.0.0.9"), Some("S3"))]),
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert!(cloud.deactivated_serials().is_empty());
    assert!(cloud.commits().is_empty());
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_prefix_and_incomplete_records_are_skipped() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![
            record(Some("10.0.0.70"), Some("S70")),
            record(Some("10.0.0.7"), None),
            record(None, Some("S-orphan")),
            record(Some("10.0.0.7"), Some("S1")),
        ]),
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert_eq!(cloud.deactivated_serials(), vec!["S1".to_string()]);
    assert_eq!(cloud.commits().len(), 1);
}

#[tokio::test]
async fn test_every_matching_record_is_deactivated() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![
            record(Some("10.0.0.7"), Some("S1")),
            record(Some("10.0.0.7"), Some("S1b")),
        ]),
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert_eq!(
        cloud.deactivated_serials(),
        vec!["S1".to_string(), "S1b".to_string()]
    );
    assert_eq!(cloud.commits().len(), 1);
}

#[tokio::test]
async fn test_failed_deactivations_skip_commit() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        MockController {
            failing_serials: vec!["S1".to_string()],
            ..controller(vec![record(Some("10.0.0.7"), Some("S1"))])
        },
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert_eq!(cloud.deactivated_serials(), vec!["S1".to_string()]);
    assert!(cloud.commits().is_empty());
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_partial_deactivation_still_commits() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        MockController {
            failing_serials: vec!["S1".to_string()],
            ..controller(vec![
                record(Some("10.0.0.7"), Some("S1")),
                record(Some("10.0.0.7"), Some("S2")),
            ])
        },
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert_eq!(cloud.commits(), vec![commit("pano-1")]);
}

#[tokio::test]
async fn test_commit_failure_reports_false() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        MockController {
            commit_fails: true,
            ..controller(vec![record(Some("10.0.0.7"), Some("S1"))])
        },
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert_eq!(cloud.commits().len(), 1);
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_failed_inventory_query_reports_false() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        MockController {
            inventory_status: "error".to_string(),
            ..controller(vec![record(Some("10.0.0.7"), Some("S1"))])
        },
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert!(cloud.deactivated_serials().is_empty());
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_passive_primary_fails_over_to_secondary() {
    let cloud = MockCloud::new()
        .with_instance("i-2", firewall("us-east-1a", Some("10.0.0.7")))
        .with_secret(SECRET_REF, secret(Some("pano-2")))
        .with_controller(
            "pano-1",
            MockController {
                ha_state: Some("passive".to_string()),
                ..controller(vec![record(Some("10.0.0.7"), Some("S1"))])
            },
        )
        .with_controller(
            "pano-2",
            controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
        );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert_eq!(cloud.controller_commands("pano-1"), vec![HA_QUERY.to_string()]);
    assert_eq!(
        cloud.controller_commands("pano-2"),
        vec![list_command(), deactivate_command("S1")]
    );
    assert_eq!(cloud.commits(), vec![commit("pano-2")]);
}

#[tokio::test]
async fn test_active_primary_is_used() {
    let cloud = MockCloud::new()
        .with_instance("i-2", firewall("us-east-1a", Some("10.0.0.7")))
        .with_secret(SECRET_REF, secret(Some("pano-2")))
        .with_controller(
            "pano-1",
            MockController {
                ha_state: Some("active".to_string()),
                ..controller(vec![record(Some("10.0.0.7"), Some("S1"))])
            },
        )
        .with_controller("pano-2", controller(vec![]));
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert!(cloud.controller_commands("pano-2").is_empty());
    assert_eq!(cloud.commits(), vec![commit("pano-1")]);
}

#[tokio::test]
async fn test_unreachable_or_silent_primary_counts_as_not_active() {
    for primary in [
        MockController {
            ha_unreachable: true,
            ..controller(vec![])
        },
        MockController {
            ha_state: None,
            ..controller(vec![])
        },
        MockController {
            unreachable: true,
            ..controller(vec![])
        },
    ] {
        let cloud = MockCloud::new()
            .with_instance("i-2", firewall("us-east-1a", Some("10.0.0.7")))
            .with_secret(SECRET_REF, secret(Some("pano-2")))
            .with_controller("pano-1", primary)
            .with_controller(
                "pano-2",
                controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
            );
        let report = orchestrator(&cloud, terminate_settings())
            .run_json(&event_json(TERMINATE, "i-2"))
            .await
            .unwrap();

        assert_eq!(report.delicensed, Some(true));
        assert!(!cloud
            .controller_commands("pano-1")
            .contains(&list_command()));
        assert_eq!(
            cloud.controller_commands("pano-2"),
            vec![list_command(), deactivate_command("S1")]
        );
    }
}

#[tokio::test]
async fn test_empty_secondary_is_ignored() {
    let cloud = MockCloud::new()
        .with_instance("i-2", firewall("us-east-1a", Some("10.0.0.7")))
        .with_secret(SECRET_REF, secret(Some("")))
        .with_controller(
            "pano-1",
            controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
        );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert!(!cloud
        .controller_commands("pano-1")
        .contains(&HA_QUERY.to_string()));
}

#[tokio::test]
async fn test_disabled_delicense_only_completes() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
    );
    let mut settings = terminate_settings();
    settings.delicense_enabled = false;
    let report = orchestrator(&cloud, settings)
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, None);
    assert_eq!(cloud.calls().len(), 1);
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_missing_secret_reference_aborts_without_completion() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
    );
    let mut settings = terminate_settings();
    settings.panorama_config = None;
    let err = orchestrator(&cloud, settings)
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Config(ConfigError::MissingSecretReference)
    ));
    assert!(!cloud
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::GetSecret { .. } | RecordedCall::Connect { .. })));
    assert!(cloud.completions().is_empty());
}

#[tokio::test]
async fn test_missing_management_ip_reports_false() {
    let cloud = single_controller_cloud(
        None,
        controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
    );
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert!(!cloud
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::GetSecret { .. } | RecordedCall::Connect { .. })));
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_unreadable_secret_reports_false() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
    )
    .with_faults(MockFaults {
        get_secret: true,
        ..Default::default()
    });
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(false));
    assert!(cloud.controller_commands("pano-1").is_empty());
    assert_eq!(cloud.completions().len(), 1);
}

#[tokio::test]
async fn test_terminate_completion_failure_is_reported_once() {
    let cloud = single_controller_cloud(
        Some("10.0.0.7"),
        controller(vec![record(Some("10.0.0.7"), Some("S1"))]),
    )
    .with_faults(MockFaults {
        complete_lifecycle: true,
        ..Default::default()
    });
    let report = orchestrator(&cloud, terminate_settings())
        .run_json(&event_json(TERMINATE, "i-2"))
        .await
        .unwrap();

    assert_eq!(report.delicensed, Some(true));
    assert!(matches!(report.completion, CompletionOutcome::Failed(_)));
    assert_eq!(cloud.completions().len(), 1);
}
