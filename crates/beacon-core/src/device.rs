//! Device and environment facts used to seed system attributes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribute::{names, Attribute};
use crate::config::GeneralConfig;
use crate::validator;

/// Reported when the platform does not expose an OS version.
pub const UNDEFINED_OS_VERSION: &str = "undefined";

/// Static facts about the device and the running agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInformation {
    pub os_name: String,
    pub os_version: Option<String>,
    pub os_build: String,
    pub manufacturer: String,
    pub model: String,
    /// Stable per-install identifier.
    pub device_id: String,
    pub agent_version: String,
    pub run_time: String,
    pub architecture: String,
    pub carrier: String,
    pub memory_usage_mb: f64,
    /// Build number of the host application, if known.
    pub application_build: Option<String>,
    pub process_id: u32,
}

impl DeviceInformation {
    /// Describe the machine this process runs on.
    pub fn from_host() -> Self {
        Self {
            os_name: std::env::consts::OS.to_string(),
            os_version: None,
            os_build: String::new(),
            manufacturer: "unknown".to_string(),
            model: std::env::consts::FAMILY.to_string(),
            device_id: Uuid::new_v4().to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            run_time: format!("rust-{}", std::env::consts::ARCH),
            architecture: std::env::consts::ARCH.to_string(),
            carrier: "wifi".to_string(),
            memory_usage_mb: 0.0,
            application_build: None,
            process_id: std::process::id(),
        }
    }
}

/// Source of device facts, queried each time the registry initializes.
pub trait DeviceInfoProvider: Send + Sync {
    fn device_information(&self) -> DeviceInformation;
}

impl DeviceInfoProvider for DeviceInformation {
    fn device_information(&self) -> DeviceInformation {
        self.clone()
    }
}

/// A normalized OS version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsVersion {
    pub version: String,
    pub major: Option<String>,
}

/// Squash spaces out of the raw version and derive the major component.
///
/// A blank or missing version becomes `"undefined"` with no major version.
/// Otherwise the major version is the text before the first `.`, `:` or
/// `-`, or the whole version when that prefix is empty.
pub fn parse_os_version(raw: Option<&str>) -> OsVersion {
    let squashed = raw.map(|v| v.replace(' ', "")).unwrap_or_default();
    if squashed.is_empty() {
        return OsVersion {
            version: UNDEFINED_OS_VERSION.to_string(),
            major: None,
        };
    }

    let major = squashed
        .split(['.', ':', '-'])
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(squashed.as_str())
        .to_string();

    OsVersion {
        version: squashed,
        major: Some(major),
    }
}

/// The system attributes stamped on every session.
///
/// String facts the platform left blank (or that are too long) are skipped.
pub fn system_attributes(
    info: &DeviceInformation,
    general: &GeneralConfig,
    session_id: &str,
) -> Vec<Attribute> {
    let os = parse_os_version(info.os_version.as_deref());
    let mut attributes = vec![Attribute::new(names::OS_VERSION, os.version)];
    if let Some(major) = os.major {
        attributes.push(Attribute::new(names::OS_MAJOR_VERSION, major));
    }

    attributes.extend([
        Attribute::new(names::OS_NAME, info.os_name.as_str()),
        Attribute::new(names::OS_BUILD, info.os_build.as_str()),
        Attribute::new(names::DEVICE_MANUFACTURER, info.manufacturer.as_str()),
        Attribute::new(names::DEVICE_MODEL, info.model.as_str()),
        Attribute::new(names::UUID, info.device_id.as_str()),
        Attribute::new(names::CARRIER, info.carrier.as_str()),
        Attribute::new(names::AGENT_VERSION, info.agent_version.as_str()),
        Attribute::new(names::MEM_USAGE_MB, info.memory_usage_mb),
        Attribute::transient(names::SESSION_ID, session_id),
        Attribute::transient(names::PROCESS_ID, info.process_id),
        Attribute::new(
            names::APPLICATION_PLATFORM,
            general.application_framework.as_str(),
        ),
        Attribute::new(
            names::APPLICATION_PLATFORM_VERSION,
            general.application_framework_version.as_str(),
        ),
        Attribute::new(names::RUNTIME, info.run_time.as_str()),
        Attribute::new(names::ARCHITECTURE, info.architecture.as_str()),
    ]);

    let build = general
        .custom_build_identifier
        .as_deref()
        .or(info.application_build.as_deref())
        .filter(|b| !b.is_empty());
    if let Some(build) = build {
        attributes.push(Attribute::new(names::APP_BUILD, build));
    }

    attributes.retain(|a| match a.string_value() {
        Some(value) => validator::is_valid_attribute_value(a.name(), value),
        None => true,
    });
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
        attributes.iter().find(|a| a.name() == name)
    }

    #[test]
    fn test_blank_os_version_is_undefined() {
        assert_eq!(
            parse_os_version(Some(" ")),
            OsVersion {
                version: "undefined".to_string(),
                major: None
            }
        );
        assert_eq!(parse_os_version(None).version, "undefined");
    }

    #[test]
    fn test_os_version_is_squashed_and_split() {
        let os = parse_os_version(Some("2.1.0-HOTFIX:RC 1"));
        assert_eq!(os.version, "2.1.0-HOTFIX:RC1");
        assert_eq!(os.major.as_deref(), Some("2"));

        let os = parse_os_version(Some("14"));
        assert_eq!(os.major.as_deref(), Some("14"));

        let os = parse_os_version(Some(".5"));
        assert_eq!(os.major.as_deref(), Some(".5"));
    }

    #[test]
    fn test_system_attributes_without_major_version() {
        let info = DeviceInformation {
            os_version: Some(" ".to_string()),
            ..DeviceInformation::default()
        };
        let attributes = system_attributes(&info, &GeneralConfig::default(), "s-1");
        assert_eq!(
            value(&attributes, "osVersion").unwrap().string_value(),
            Some("undefined")
        );
        assert!(value(&attributes, "osMajorVersion").is_none());
    }

    #[test]
    fn test_system_attributes_content() {
        let info = DeviceInformation {
            os_name: "Android".to_string(),
            os_version: Some("13".to_string()),
            device_id: "device-1".to_string(),
            memory_usage_mb: 128.5,
            application_build: Some("77".to_string()),
            process_id: 4242,
            ..DeviceInformation::default()
        };
        let attributes = system_attributes(&info, &GeneralConfig::default(), "session-1");

        assert_eq!(value(&attributes, "osName").unwrap().string_value(), Some("Android"));
        assert_eq!(value(&attributes, "osMajorVersion").unwrap().string_value(), Some("13"));
        assert_eq!(value(&attributes, "uuid").unwrap().string_value(), Some("device-1"));
        assert_eq!(value(&attributes, "memUsageMb").unwrap().double_value(), Some(128.5));
        assert_eq!(value(&attributes, "appBuild").unwrap().string_value(), Some("77"));

        let session = value(&attributes, "sessionId").unwrap();
        assert_eq!(session.string_value(), Some("session-1"));
        assert!(!session.is_persistent());
        assert_eq!(value(&attributes, "processId").unwrap().double_value(), Some(4242.0));
    }

    #[test]
    fn test_blank_string_facts_are_skipped() {
        let info = DeviceInformation {
            os_name: "linux".to_string(),
            os_build: String::new(),
            model: "x".repeat(4096),
            ..DeviceInformation::default()
        };
        let attributes = system_attributes(&info, &GeneralConfig::default(), "s-1");
        assert!(value(&attributes, "osBuild").is_none());
        assert!(value(&attributes, "deviceModel").is_none());
        assert!(value(&attributes, "osName").is_some());
        assert!(value(&attributes, "memUsageMb").is_some());
        assert!(attributes
            .iter()
            .filter_map(|a| a.string_value())
            .all(|v| !v.is_empty()));
    }

    #[test]
    fn test_custom_build_identifier_wins() {
        let info = DeviceInformation {
            application_build: Some("77".to_string()),
            ..DeviceInformation::default()
        };
        let general = GeneralConfig {
            custom_build_identifier: Some("release-9".to_string()),
            ..GeneralConfig::default()
        };
        let attributes = system_attributes(&info, &general, "s");
        assert_eq!(
            value(&attributes, "appBuild").unwrap().string_value(),
            Some("release-9")
        );
    }
}
