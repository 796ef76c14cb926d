use crate::{MAX_PART_SIZE, MAX_PARTS, MIN_PART_SIZE, TransferError};

/// Checks an upload against the backend limits before any network call.
///
/// Rejects files larger than `max_file_size`, part sizes outside
/// [`MIN_PART_SIZE`]..=[`MAX_PART_SIZE`], and plans with more than
/// [`MAX_PARTS`] parts.
pub fn validate_upload_size(
    total_size: u64,
    part_size: u64,
    max_file_size: u64,
) -> Result<(), TransferError> {
    if total_size > max_file_size {
        return Err(TransferError::FileTooLarge {
            size: total_size,
            max: max_file_size,
        });
    }

    validate_part_size(part_size)?;

    let parts = total_size.div_ceil(part_size).max(1);
    if parts > MAX_PARTS {
        return Err(TransferError::TooManyParts {
            parts,
            max: MAX_PARTS,
        });
    }

    Ok(())
}

/// Checks that `part_size` is within the backend's accepted range.
pub fn validate_part_size(part_size: u64) -> Result<(), TransferError> {
    if part_size < MIN_PART_SIZE {
        return Err(TransferError::InvalidPartSize(format!(
            "{part_size} bytes is below the {MIN_PART_SIZE} byte minimum"
        )));
    }
    if part_size > MAX_PART_SIZE {
        return Err(TransferError::InvalidPartSize(format!(
            "{part_size} bytes exceeds the {MAX_PART_SIZE} byte maximum"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_PART_SIZE;

    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;

    #[test]
    fn accepts_typical_upload() {
        assert!(validate_upload_size(25 * MB, 10 * MB, 5 * GB).is_ok());
        assert!(validate_upload_size(0, DEFAULT_PART_SIZE, 5 * GB).is_ok());
    }

    #[test]
    fn accepts_exact_limit() {
        assert!(validate_upload_size(5 * GB, DEFAULT_PART_SIZE, 5 * GB).is_ok());
    }

    #[test]
    fn rejects_file_over_limit() {
        let err = validate_upload_size(5 * GB + 1, DEFAULT_PART_SIZE, 5 * GB).unwrap_err();
        assert!(matches!(err, TransferError::FileTooLarge { .. }));
    }

    #[test]
    fn rejects_part_size_out_of_range() {
        assert!(matches!(
            validate_upload_size(MB, MIN_PART_SIZE - 1, 5 * GB),
            Err(TransferError::InvalidPartSize(_))
        ));
        assert!(matches!(
            validate_part_size(MAX_PART_SIZE + 1),
            Err(TransferError::InvalidPartSize(_))
        ));
        assert!(validate_part_size(MIN_PART_SIZE).is_ok());
        assert!(validate_part_size(MAX_PART_SIZE).is_ok());
    }

    #[test]
    fn rejects_too_many_parts() {
        // 10_001 minimum-size parts.
        let total = (MAX_PARTS + 1) * MIN_PART_SIZE;
        let err = validate_upload_size(total, MIN_PART_SIZE, u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            TransferError::TooManyParts {
                parts: 10_001,
                max: 10_000
            }
        ));
    }
}
