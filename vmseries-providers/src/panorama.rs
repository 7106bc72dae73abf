//! Operational command surface of the management controller.
//!
//! Sessions receive plain command strings; [`ControllerCommand`] builds them
//! and lets backends recognise them again.

/// Administrative identity the license plugin commits as.
pub const LICENSE_PLUGIN_ADMIN: &str = "__sw_fw_license";

pub const HA_STATE: &str = "show high-availability state";

const LIST_DEVICES_PREFIX: &str = "show plugins sw_fw_license devices license-manager ";
const DEACTIVATE_PREFIX: &str = "request plugins sw_fw_license deactivate license-manager ";
const DEVICES_MEMBER: &str = " devices member ";

/// HA role reported by a controller that should receive commands.
pub const HA_ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    HaState,
    ListDevices {
        license_manager: String,
    },
    Deactivate {
        license_manager: String,
        serial: String,
    },
}

impl ControllerCommand {
    pub fn to_command_string(&self) -> String {
        match self {
            ControllerCommand::HaState => HA_STATE.to_string(),
            ControllerCommand::ListDevices { license_manager } => {
                format!("{}\"{}\"", LIST_DEVICES_PREFIX, license_manager)
            }
            ControllerCommand::Deactivate {
                license_manager,
                serial,
            } => format!(
                "{}\"{}\"{}\"{}\"",
                DEACTIVATE_PREFIX, license_manager, DEVICES_MEMBER, serial
            ),
        }
    }

    pub fn parse(command: &str) -> Option<Self> {
        let command = command.trim();
        if command == HA_STATE {
            return Some(ControllerCommand::HaState);
        }
        if let Some(rest) = command.strip_prefix(LIST_DEVICES_PREFIX) {
            return unquote(rest).map(|lm| ControllerCommand::ListDevices {
                license_manager: lm.to_string(),
            });
        }
        if let Some(rest) = command.strip_prefix(DEACTIVATE_PREFIX) {
            let (lm, serial) = rest.split_once(DEVICES_MEMBER)?;
            return Some(ControllerCommand::Deactivate {
                license_manager: unquote(lm)?.to_string(),
                serial: unquote(serial)?.to_string(),
            });
        }
        None
    }
}

fn unquote(s: &str) -> Option<&str> {
    s.trim().strip_prefix('"')?.strip_suffix('"')
}
