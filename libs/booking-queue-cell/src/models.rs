use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use shared_models::TicketStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTicketRequest {
    pub appointment_id: i64,
    pub service_point_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceTicketRequest {
    pub status: TicketStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTicketRequest {
    pub service_point_id: i64,
}

/// `date` defaults to the current UTC day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub branch_id: i64,
    pub queue_date: NaiveDate,
    pub waiting: usize,
    pub serving: usize,
    pub complete: usize,
    pub total: usize,
    /// Mean of issued -> called over tickets that have been called.
    pub average_wait_minutes: Option<f64>,
}
