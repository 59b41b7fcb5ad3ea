use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use shared_database::{PolicyRepository, StoreError};
use shared_models::{normalize_offsets, BranchPolicy, PolicyUpdate, MAX_REMINDER_OFFSETS};
use shared_utils::Clock;

use crate::error::AppointmentError;

/// Version-guarded writes give up after this many lost races.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct PolicyService {
    store: Arc<dyn PolicyRepository>,
    clock: Arc<dyn Clock>,
}

impl PolicyService {
    pub fn new(store: Arc<dyn PolicyRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Never fails. Branches without a stored record, or whose record cannot
    /// be read, get the defaults with `id == 0`.
    pub async fn get(&self, branch_id: i64) -> BranchPolicy {
        match self.store.find_policy(branch_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                debug!("No policy stored for branch {}, using defaults", branch_id);
                BranchPolicy::defaults(branch_id)
            }
            Err(e) => {
                error!("Failed to load policy for branch {}: {}. Using defaults", branch_id, e);
                BranchPolicy::defaults(branch_id)
            }
        }
    }

    /// Merges `update` over the current (or default) policy and bumps the
    /// version.
    #[instrument(skip(self, update))]
    pub async fn upsert(
        &self,
        branch_id: i64,
        update: PolicyUpdate,
        actor_id: Option<&str>,
    ) -> Result<BranchPolicy, AppointmentError> {
        validate_update(&update)?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.store.find_policy(branch_id).await?;
            let expected_version = current.as_ref().map(|p| p.version);
            let base = current.unwrap_or_else(|| BranchPolicy::defaults(branch_id));

            let mut next = update.merge_over(&base);
            next.branch_id = branch_id;
            next.version = base.version + 1;
            next.updated_by = actor_id.map(str::to_string);
            next.updated_at = Some(self.clock.now());

            match self.store.save_policy(next, expected_version).await {
                Ok(saved) => {
                    info!("Policy for branch {} saved at version {}", branch_id, saved.version);
                    return Ok(saved);
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!(
                        "Policy write for branch {} lost a race (attempt {}): {}",
                        branch_id, attempt, msg
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(format!(
            "policy for branch {} kept changing, giving up after {} attempts",
            branch_id, MAX_WRITE_ATTEMPTS
        ))
        .into())
    }

    /// Creates the record if the branch has none yet.
    pub async fn toggle_emergency_mode(
        &self,
        branch_id: i64,
        enabled: bool,
        actor_id: Option<&str>,
    ) -> Result<BranchPolicy, AppointmentError> {
        info!("Setting emergency mode for branch {} to {}", branch_id, enabled);
        self.upsert(branch_id, PolicyUpdate::emergency(enabled), actor_id).await
    }

    /// Drops the stored record so the branch reverts to defaults.
    pub async fn reset(&self, branch_id: i64) -> Result<bool, AppointmentError> {
        let removed = self.store.delete_policy(branch_id).await?;
        if removed {
            info!("Policy for branch {} reset to defaults", branch_id);
        }
        Ok(removed)
    }
}

fn validate_update(update: &PolicyUpdate) -> Result<(), AppointmentError> {
    if update.max_reschedules == Some(0) {
        return Err(AppointmentError::InvalidRequest(
            "max_reschedules must be at least 1".to_string(),
        ));
    }
    if update.max_advance_booking_days == Some(0) {
        return Err(AppointmentError::InvalidRequest(
            "max_advance_booking_days must be at least 1".to_string(),
        ));
    }
    if let Some(offsets) = &update.reminder_offsets_hours {
        if normalize_offsets(offsets).len() > MAX_REMINDER_OFFSETS {
            return Err(AppointmentError::InvalidRequest(format!(
                "at most {} reminder offsets are allowed",
                MAX_REMINDER_OFFSETS
            )));
        }
    }
    Ok(())
}
