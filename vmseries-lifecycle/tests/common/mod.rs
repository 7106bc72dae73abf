// Shared fixtures for lifecycle integration tests.
// All collaborators are served by the in-memory mock backend.
#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use vmseries_common::LicenseRecord;
use vmseries_lifecycle::{Backends, LifecycleOrchestrator, Settings};
use vmseries_providers::mock::{MockCloud, MockController, MockInstance, MockInterface};

pub const LAUNCH: &str = "EC2 Instance-launch Lifecycle Action";
pub const TERMINATE: &str = "EC2 Instance-terminate Lifecycle Action";
pub const SECRET_REF: &str = "panorama-creds";

pub fn event_json(detail_type: &str, instance_id: &str) -> String {
    json!({
        "id": "evt-1",
        "detail-type": detail_type,
        "source": "aws.autoscaling",
        "detail": {
            "EC2InstanceId": instance_id,
            "LifecycleHookName": "hook-a",
            "AutoScalingGroupName": "asg-fw",
            "LifecycleActionToken": "tok-1"
        }
    })
    .to_string()
}

pub fn launch_settings() -> Settings {
    Settings {
        region: "us-east-1".to_string(),
        delicense_enabled: false,
        interfaces_config: Some(r#"{"us-east-1a":"subnet-9","us-east-1b":"subnet-10"}"#.to_string()),
        security_group_id: Some("sg-5".to_string()),
        panorama_config: None,
    }
}

pub fn terminate_settings() -> Settings {
    Settings {
        region: "us-east-1".to_string(),
        delicense_enabled: true,
        interfaces_config: None,
        security_group_id: None,
        panorama_config: Some(SECRET_REF.to_string()),
    }
}

pub fn interface(id: &str, device_index: u32, ip: Option<&str>) -> MockInterface {
    MockInterface {
        id: id.to_string(),
        device_index,
        private_ip: ip.map(str::to_string),
        attachment_id: Some(format!("{}-attach", id)),
    }
}

/// Instance with a primary data interface and, optionally, a management
/// interface at index 1.
pub fn firewall(zone: &str, mgmt_ip: Option<&str>) -> MockInstance {
    let mut interfaces = vec![interface("eni-data", 0, Some("10.0.1.4"))];
    if let Some(ip) = mgmt_ip {
        interfaces.push(interface("eni-mgmt", 1, Some(ip)));
    }
    MockInstance {
        zone: zone.to_string(),
        subnet: "subnet-1".to_string(),
        interfaces,
    }
}

pub fn record(ip: Option<&str>, serial: Option<&str>) -> LicenseRecord {
    LicenseRecord {
        management_ip: ip.map(str::to_string),
        serial_number: serial.map(str::to_string),
    }
}

pub fn secret(panorama2: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "username": "admin",
        "password": "pw",
        "panorama1": "pano-1",
        "license_manager": "lm-1"
    });
    if let Some(p2) = panorama2 {
        body["panorama2"] = json!(p2);
    }
    body
}

pub fn controller(devices: Vec<LicenseRecord>) -> MockController {
    MockController {
        license_manager: Some("lm-1".to_string()),
        ..MockController::with_devices(devices)
    }
}

pub fn orchestrator(cloud: &MockCloud, settings: Settings) -> LifecycleOrchestrator {
    let shared = Arc::new(cloud.clone());
    LifecycleOrchestrator::new(
        settings,
        Backends {
            compute: shared.clone(),
            autoscaler: shared.clone(),
            secrets: shared.clone(),
            controllers: shared,
        },
    )
}
