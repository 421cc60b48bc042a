//! Allow-list validation for identifiers placed on the wire
//!
//! Service IDs follow Kubernetes resource-name rules because host services
//! are deployed as cluster apps. Message types are plain identifiers.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

const MAX_SERVICE_ID_LENGTH: usize = 253;
const MAX_MESSAGE_TYPE_LENGTH: usize = 255;

static SERVICE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9.-]*[a-z0-9])?$").expect("service id pattern is valid")
});

static MESSAGE_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("message type pattern is valid")
});

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Validate a service identifier (source or destination of an envelope)
pub fn validate_service_id(service_id: &str) -> Result<()> {
    if is_blank(service_id) {
        return Err(Error::invalid("service id", service_id, "must not be empty"));
    }
    if service_id.len() > MAX_SERVICE_ID_LENGTH {
        return Err(Error::invalid("service id", service_id, "exceeds 253 characters"));
    }
    if !SERVICE_ID_PATTERN.is_match(service_id) {
        return Err(Error::invalid(
            "service id",
            service_id,
            "must be lowercase alphanumeric with '.' or '-' separators",
        ));
    }
    Ok(())
}

/// Validate a message type tag
pub fn validate_message_type(message_type: &str) -> Result<()> {
    if is_blank(message_type) {
        return Err(Error::invalid("message type", message_type, "must not be empty"));
    }
    if message_type.len() > MAX_MESSAGE_TYPE_LENGTH {
        return Err(Error::invalid("message type", message_type, "exceeds 255 characters"));
    }
    if !MESSAGE_TYPE_PATTERN.is_match(message_type) {
        return Err(Error::invalid(
            "message type",
            message_type,
            "must be an identifier (letters, digits, underscore)",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_cluster_style_service_ids() {
        assert!(validate_service_id("hostsvc-sensor").is_ok());
        assert!(validate_service_id("platform.deployment").is_ok());
        assert!(validate_service_id("a").is_ok());
    }

    #[test]
    fn rejects_malformed_service_ids() {
        assert!(validate_service_id("").is_err());
        assert!(validate_service_id("   ").is_err());
        assert!(validate_service_id("HostSvc").is_err());
        assert!(validate_service_id("-sensor").is_err());
        assert!(validate_service_id("sensor-").is_err());
        assert!(validate_service_id("sensor;rm -rf").is_err());
        assert!(validate_service_id(&"a".repeat(254)).is_err());
    }

    #[test]
    fn message_types_are_identifiers() {
        assert!(validate_message_type("SensorData").is_ok());
        assert!(validate_message_type("_private_1").is_ok());
        assert!(validate_message_type("1Bad").is_err());
        assert!(validate_message_type("has space").is_err());

        match validate_message_type("") {
            Err(Error::InvalidIdentifier { kind, .. }) => assert_eq!(kind, "message type"),
            other => panic!("Expected InvalidIdentifier, got {:?}", other),
        }
    }
}
