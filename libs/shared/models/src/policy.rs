use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CANCELLATION_HOURS: u32 = 24;
pub const DEFAULT_RESCHEDULE_TIME_LIMIT_HOURS: u32 = 24;
pub const DEFAULT_MAX_RESCHEDULES: u32 = 3;
pub const DEFAULT_MAX_ADVANCE_BOOKING_DAYS: u32 = 30;
pub const DEFAULT_REMINDER_OFFSETS_HOURS: [u32; 2] = [24, 2];
pub const MAX_REMINDER_OFFSETS: usize = 5;

/// Per-branch business rules. `id == 0` marks hydrated defaults that were
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchPolicy {
    pub id: i64,
    pub branch_id: i64,
    pub cancellation_hours: u32,
    pub reschedule_time_limit_hours: u32,
    pub max_reschedules: u32,
    pub max_advance_booking_days: u32,
    pub reminders_enabled: bool,
    pub reminder_offsets_hours: Vec<u32>,
    pub reminder_message_template: Option<String>,
    pub emergency_mode: bool,
    pub is_active: bool,
    pub version: i64,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BranchPolicy {
    pub fn defaults(branch_id: i64) -> Self {
        Self {
            id: 0,
            branch_id,
            cancellation_hours: DEFAULT_CANCELLATION_HOURS,
            reschedule_time_limit_hours: DEFAULT_RESCHEDULE_TIME_LIMIT_HOURS,
            max_reschedules: DEFAULT_MAX_RESCHEDULES,
            max_advance_booking_days: DEFAULT_MAX_ADVANCE_BOOKING_DAYS,
            reminders_enabled: true,
            reminder_offsets_hours: DEFAULT_REMINDER_OFFSETS_HOURS.to_vec(),
            reminder_message_template: None,
            emergency_mode: false,
            is_active: true,
            version: 0,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

/// Partial configuration write. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyUpdate {
    pub cancellation_hours: Option<u32>,
    pub reschedule_time_limit_hours: Option<u32>,
    pub max_reschedules: Option<u32>,
    pub max_advance_booking_days: Option<u32>,
    pub reminders_enabled: Option<bool>,
    pub reminder_offsets_hours: Option<Vec<u32>>,
    /// An empty string clears the template.
    pub reminder_message_template: Option<String>,
    pub emergency_mode: Option<bool>,
    pub is_active: Option<bool>,
}

impl PolicyUpdate {
    pub fn emergency(enabled: bool) -> Self {
        Self {
            emergency_mode: Some(enabled),
            ..Default::default()
        }
    }

    /// Overlay the provided fields on `base`. Identity, version and audit
    /// stamps are left to the caller.
    pub fn merge_over(&self, base: &BranchPolicy) -> BranchPolicy {
        let mut merged = base.clone();
        if let Some(v) = self.cancellation_hours {
            merged.cancellation_hours = v;
        }
        if let Some(v) = self.reschedule_time_limit_hours {
            merged.reschedule_time_limit_hours = v;
        }
        if let Some(v) = self.max_reschedules {
            merged.max_reschedules = v;
        }
        if let Some(v) = self.max_advance_booking_days {
            merged.max_advance_booking_days = v;
        }
        if let Some(v) = self.reminders_enabled {
            merged.reminders_enabled = v;
        }
        if let Some(offsets) = &self.reminder_offsets_hours {
            merged.reminder_offsets_hours = normalize_offsets(offsets);
        }
        if let Some(template) = &self.reminder_message_template {
            merged.reminder_message_template = if template.trim().is_empty() {
                None
            } else {
                Some(template.clone())
            };
        }
        if let Some(v) = self.emergency_mode {
            merged.emergency_mode = v;
        }
        if let Some(v) = self.is_active {
            merged.is_active = v;
        }
        merged
    }
}

/// Deduplicated, largest offset first.
pub fn normalize_offsets(offsets: &[u32]) -> Vec<u32> {
    let mut normalized = offsets.to_vec();
    normalized.sort_unstable_by(|a, b| b.cmp(a));
    normalized.dedup();
    normalized
}
