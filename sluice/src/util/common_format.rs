use std::fmt::Display;

use crate::message::{PartitionId, SequenceNumber};

pub(crate) fn partition_range(
    partition: PartitionId,
    first: SequenceNumber,
    last: SequenceNumber,
) -> String {
    format!(
        "partition: {}, sequence: {}..={}",
        partition, first, last
    )
}

pub(crate) fn partition_range_err(
    partition: PartitionId,
    first: SequenceNumber,
    last: SequenceNumber,
    err: &impl Display,
) -> String {
    format!(
        "partition: {}, sequence: {}..={}, caused by: {}",
        partition, first, last, err
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!(
            partition_range(PartitionId(3), 101, 105),
            "partition: p3, sequence: 101..=105"
        );
        assert_eq!(
            partition_range_err(PartitionId(0), 1, 1, &"refused"),
            "partition: p0, sequence: 1..=1, caused by: refused"
        );
    }
}
