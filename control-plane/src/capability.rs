//! Capability Resolver: bit-field to named-set translation and
//! the supervisor-mode zero-capability inference rule.

use crate::model::ManagementMode;

pub const REPORTS_STATUS: u64 = 1 << 0;
pub const ACCEPTS_REMOTE_CONFIG: u64 = 1 << 1;
pub const REPORTS_EFFECTIVE_CONFIG: u64 = 1 << 2;
pub const ACCEPTS_PACKAGES: u64 = 1 << 3;
pub const REPORTS_PACKAGE_STATUSES: u64 = 1 << 4;
pub const REPORTS_OWN_TRACES: u64 = 1 << 5;
pub const REPORTS_OWN_METRICS: u64 = 1 << 6;
pub const REPORTS_OWN_LOGS: u64 = 1 << 7;
pub const ACCEPTS_OPAMP_CONNECTION_SETTINGS: u64 = 1 << 8;
pub const ACCEPTS_OTHER_CONNECTION_SETTINGS: u64 = 1 << 9;
pub const ACCEPTS_RESTART_COMMAND: u64 = 1 << 10;
pub const REPORTS_HEALTH: u64 = 1 << 11;
pub const REPORTS_REMOTE_CONFIG: u64 = 1 << 12;
pub const REPORTS_HEARTBEAT: u64 = 1 << 13;
pub const REPORTS_AVAILABLE_COMPONENTS: u64 = 1 << 14;
pub const REPORTS_CONNECTION_SETTINGS_STATUS: u64 = 1 << 15;

/// The bit-set a supervisor is assumed to support when it reports zero
/// capabilities explicitly: bits 0-2, 5-8, 10-14.
pub const SUPERVISOR_INFERRED_CAPABILITIES: u64 = REPORTS_STATUS
    | ACCEPTS_REMOTE_CONFIG
    | REPORTS_EFFECTIVE_CONFIG
    | REPORTS_OWN_TRACES
    | REPORTS_OWN_METRICS
    | REPORTS_OWN_LOGS
    | ACCEPTS_OPAMP_CONNECTION_SETTINGS
    | ACCEPTS_RESTART_COMMAND
    | REPORTS_HEALTH
    | REPORTS_REMOTE_CONFIG
    | REPORTS_HEARTBEAT
    | REPORTS_AVAILABLE_COMPONENTS;

pub const SERVER_CAPABILITIES: u64 = ServerCapability::AcceptsStatus as u64
    | ServerCapability::OffersRemoteConfig as u64
    | ServerCapability::AcceptsEffectiveConfig as u64
    | ServerCapability::OffersPackages as u64
    | ServerCapability::AcceptsPackagesStatus as u64
    | ServerCapability::OffersConnectionSettings as u64
    | ServerCapability::AcceptsConnectionSettingsRequest as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ServerCapability {
    AcceptsStatus = 1 << 0,
    OffersRemoteConfig = 1 << 1,
    AcceptsEffectiveConfig = 1 << 2,
    OffersPackages = 1 << 3,
    AcceptsPackagesStatus = 1 << 4,
    OffersConnectionSettings = 1 << 5,
    AcceptsConnectionSettingsRequest = 1 << 6,
}

/// Pure function: a supervisor reporting zero
/// capabilities is assumed to support [`SUPERVISOR_INFERRED_CAPABILITIES`];
/// any non-zero report, under any management mode, is taken verbatim.
pub fn resolve_capabilities(management_mode: ManagementMode, reported: u64) -> u64 {
    if reported == 0 && management_mode == ManagementMode::Supervisor {
        SUPERVISOR_INFERRED_CAPABILITIES
    } else {
        reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_default_constant_matches_documented_value() {
        assert_eq!(SUPERVISOR_INFERRED_CAPABILITIES, 0x7DE7);
    }

    #[test]
    fn zero_report_under_supervisor_is_inferred() {
        assert_eq!(
            resolve_capabilities(ManagementMode::Supervisor, 0),
            0x7DE7
        );
    }

    #[test]
    fn zero_report_under_extension_stays_zero() {
        assert_eq!(resolve_capabilities(ManagementMode::Extension, 0), 0);
    }

    #[test]
    fn non_zero_report_is_never_overridden() {
        assert_eq!(
            resolve_capabilities(ManagementMode::Supervisor, 0x1FFF),
            0x1FFF
        );
        assert_eq!(
            resolve_capabilities(ManagementMode::Extension, 0x1FFF),
            0x1FFF
        );
    }
}
