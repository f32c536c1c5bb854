//! Quota-gated deletion policy.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("total quota is unknown; a quota-gated delete needs a known quota")]
    UnknownTotal,
}

/// Decide whether stored content should be deleted.
///
/// Nothing is deleted when `current_usage` is zero or less. `force` skips the
/// quota comparison; otherwise deletion happens once usage reaches the total.
pub fn should_delete(
    current_usage: i64,
    total_quota: Option<i64>,
    force: bool,
) -> Result<bool, QuotaError> {
    if current_usage <= 0 {
        return Ok(false);
    }
    if force {
        return Ok(true);
    }
    let total = total_quota.ok_or(QuotaError::UnknownTotal)?;
    Ok(current_usage >= total)
}
