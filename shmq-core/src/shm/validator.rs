// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Payload validation using checksums.
//!
//! Validates sizes before a message enters the queue and integrity when
//! it leaves. Fails immediately on checksum mismatch - NO fallback.

use crate::error::QueueError;

/// Validator for queue payloads.
pub struct PayloadValidator;

impl PayloadValidator {
    /// Validate a payload before it is copied into a slot.
    pub fn validate_for_send(payload: &[u8], max_message_len: usize) -> Result<(), QueueError> {
        if payload.len() > max_message_len {
            return Err(QueueError::MessageTooLarge {
                size: payload.len(),
                max: max_message_len,
            });
        }
        Ok(())
    }

    /// Validate that a stored message fits the receiver's buffer.
    pub fn validate_for_receive(stored_len: usize, buffer_len: usize) -> Result<(), QueueError> {
        if buffer_len < stored_len {
            return Err(QueueError::BufferTooSmall {
                required: stored_len,
                available: buffer_len,
            });
        }
        Ok(())
    }

    /// Calculate CRC32 checksum for a payload.
    pub fn calculate_checksum(payload: &[u8]) -> u32 {
        crc32fast::hash(payload)
    }

    /// Verify a payload read back from a slot against its stored checksum.
    pub fn validate_checksum(
        payload: &[u8],
        msg_type: i64,
        expected: u32,
    ) -> Result<(), QueueError> {
        let actual = Self::calculate_checksum(payload);

        if actual != expected {
            return Err(QueueError::ChecksumMismatch {
                msg_type,
                expected,
                actual,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_validation() {
        let payload = b"Bonjour c'est 4242 !";
        let checksum = PayloadValidator::calculate_checksum(payload);

        assert!(PayloadValidator::validate_checksum(payload, 1, checksum).is_ok());
        assert!(matches!(
            PayloadValidator::validate_checksum(payload, 1, checksum ^ 1),
            Err(QueueError::ChecksumMismatch { msg_type: 1, .. })
        ));
    }

    #[test]
    fn test_send_size_validation() {
        assert!(PayloadValidator::validate_for_send(&[0u8; 25], 25).is_ok());
        assert!(PayloadValidator::validate_for_send(&[], 25).is_ok());
        assert!(matches!(
            PayloadValidator::validate_for_send(&[0u8; 26], 25),
            Err(QueueError::MessageTooLarge { size: 26, max: 25 })
        ));
    }

    #[test]
    fn test_receive_buffer_validation() {
        assert!(PayloadValidator::validate_for_receive(10, 10).is_ok());
        assert!(matches!(
            PayloadValidator::validate_for_receive(10, 9),
            Err(QueueError::BufferTooSmall {
                required: 10,
                available: 9
            })
        ));
    }
}
