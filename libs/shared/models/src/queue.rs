use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicePoint {
    pub id: i64,
    pub branch_id: i64,
    pub name: String,
    pub is_active: bool,
    /// Services this counter is able to handle.
    pub service_ids: Vec<i64>,
}

impl ServicePoint {
    pub fn can_serve(&self, service_id: i64) -> bool {
        self.service_ids.contains(&service_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Serving,
    Complete,
}

impl TicketStatus {
    pub fn can_transition_to(&self, target: &TicketStatus) -> bool {
        matches!(
            (self, target),
            (TicketStatus::Waiting, TicketStatus::Serving)
                | (TicketStatus::Serving, TicketStatus::Complete)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Waiting => write!(f, "waiting"),
            TicketStatus::Serving => write!(f, "serving"),
            TicketStatus::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueTicket {
    pub id: i64,
    pub appointment_id: i64,
    pub branch_id: i64,
    pub service_point_id: i64,
    /// Sequential within (branch, queue_date), starting at 1.
    pub ticket_number: u32,
    pub queue_date: NaiveDate,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything the store needs to issue a ticket except its number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDraft {
    pub appointment_id: i64,
    pub branch_id: i64,
    pub service_point_id: i64,
    pub queue_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
}

impl TicketDraft {
    pub fn into_ticket(self, id: i64, ticket_number: u32) -> QueueTicket {
        QueueTicket {
            id,
            appointment_id: self.appointment_id,
            branch_id: self.branch_id,
            service_point_id: self.service_point_id,
            ticket_number,
            queue_date: self.queue_date,
            status: TicketStatus::Waiting,
            issued_at: self.issued_at,
            called_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_moves_forward_only() {
        assert!(TicketStatus::Waiting.can_transition_to(&TicketStatus::Serving));
        assert!(TicketStatus::Serving.can_transition_to(&TicketStatus::Complete));
        assert!(!TicketStatus::Waiting.can_transition_to(&TicketStatus::Complete));
        assert!(!TicketStatus::Complete.can_transition_to(&TicketStatus::Waiting));
        assert!(!TicketStatus::Serving.can_transition_to(&TicketStatus::Serving));
    }
}
