//! Implementations of the [crate::Storage] trait.

pub mod memory;
pub mod tokio;

/// Partition names become directory names, so only a conservative alphabet is accepted.
pub(crate) fn validate_partition_name(partition: &str) -> Result<(), crate::Error> {
    if partition.is_empty()
        || !partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(crate::Error::PartitionNameInvalid(partition.into()));
    }
    Ok(())
}
