use crate::TransferError;

/// Half-open byte range `[start, end)` within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One planned part of a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPart {
    /// 1-based part number.
    pub part_number: u32,
    pub range: ByteRange,
}

/// Splits a file of `total_size` bytes into contiguous parts of at most
/// `part_size` bytes.
///
/// A zero-byte file is planned as exactly one zero-length part so the
/// multipart protocol still runs end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    total_parts: u32,
}

impl PartPlan {
    /// Creates a plan. Fails if `part_size` is zero or the part count does
    /// not fit in a `u32`.
    pub fn new(total_size: u64, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 {
            return Err(TransferError::InvalidPartSize("part size must be > 0".into()));
        }
        let parts = total_size.div_ceil(part_size).max(1);
        let total_parts = u32::try_from(parts).map_err(|_| TransferError::TooManyParts {
            parts,
            max: u64::from(u32::MAX),
        })?;
        Ok(Self {
            total_size,
            part_size,
            total_parts,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Returns the byte range of part `part_number` (1-based).
    pub fn part(&self, part_number: u32) -> Result<PlannedPart, TransferError> {
        if part_number == 0 || part_number > self.total_parts {
            return Err(TransferError::InvalidPartNumber {
                part_number,
                total_parts: self.total_parts,
            });
        }
        let start = u64::from(part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.total_size);
        Ok(PlannedPart {
            part_number,
            range: ByteRange { start, end },
        })
    }

    /// Iterates all parts in ascending order.
    pub fn parts(&self) -> impl Iterator<Item = PlannedPart> + '_ {
        (1..=self.total_parts).filter_map(|n| self.part(n).ok())
    }
}
