use thiserror::Error;

/// Maximum length for a Postgres replication slot name in bytes.
pub const MAX_SLOT_NAME_LENGTH: usize = 63;

/// Error type for slot name validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotNameError {
    #[error("replication slot name must not be empty")]
    Empty,

    #[error("replication slot name {0:?} exceeds {MAX_SLOT_NAME_LENGTH} bytes")]
    InvalidSlotNameLength(String),

    #[error(
        "replication slot name {0:?} contains invalid character, only lower case letters, numbers and underscore are allowed"
    )]
    InvalidSlotName(String),
}

/// Validates a replication slot name using the same rules Postgres applies on creation.
///
/// Checking up front gives a configuration error instead of a server round trip that fails
/// halfway through endpoint preparation.
pub fn validate_slot_name(slot_name: &str) -> Result<(), SlotNameError> {
    if slot_name.is_empty() {
        return Err(SlotNameError::Empty);
    }

    if slot_name.len() > MAX_SLOT_NAME_LENGTH {
        return Err(SlotNameError::InvalidSlotNameLength(slot_name.into()));
    }

    let valid = slot_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(SlotNameError::InvalidSlotName(slot_name.into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slot_names() {
        assert!(validate_slot_name("conduitslot1").is_ok());
        assert!(validate_slot_name("cdc_slot_42").is_ok());
        assert!(validate_slot_name(&"a".repeat(MAX_SLOT_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_empty_slot_name() {
        assert_eq!(validate_slot_name(""), Err(SlotNameError::Empty));
    }

    #[test]
    fn test_slot_name_length_validation() {
        let slot_name = "a".repeat(MAX_SLOT_NAME_LENGTH + 1);
        assert_eq!(
            validate_slot_name(&slot_name),
            Err(SlotNameError::InvalidSlotNameLength(slot_name.clone()))
        );
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate_slot_name("Upper").is_err());
        assert!(validate_slot_name("with-dash").is_err());
        assert!(validate_slot_name("with space").is_err());
    }
}
