use shared_models::{Appointment, BranchPolicy};

use crate::models::ReminderMessage;

pub const REMINDER_SUBJECT: &str = "Appointment reminder";

const DEFAULT_TEMPLATE: &str = "<p>Hello {customer_name},</p>\
<p>This is a reminder that your appointment is scheduled for {scheduled_at}, \
in about {hours} hours.</p>\
<p>Your confirmation code is <strong>{confirmation_code}</strong>.</p>";

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Fills the branch template (or the default one) for a single reminder.
pub fn render(
    policy: &BranchPolicy,
    appointment: &Appointment,
    to: &str,
    offset_hours: u32,
) -> ReminderMessage {
    let template = policy
        .reminder_message_template
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TEMPLATE);

    let html_body = template
        .replace("{customer_name}", &escape_html(&appointment.customer_name))
        .replace(
            "{scheduled_at}",
            &appointment.scheduled_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        )
        .replace("{confirmation_code}", &appointment.confirmation_code)
        .replace("{hours}", &offset_hours.to_string());

    ReminderMessage {
        to: to.to_string(),
        subject: REMINDER_SUBJECT.to_string(),
        html_body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared_models::AppointmentStatus;

    fn appointment() -> Appointment {
        let at = Utc.with_ymd_and_hms(2030, 5, 1, 14, 30, 0).unwrap();
        Appointment {
            id: 1,
            branch_id: 1,
            service_id: 1,
            service_point_id: None,
            customer_id: None,
            customer_name: "Ada <Lovelace>".to_string(),
            customer_email: Some("ada@example.com".to_string()),
            scheduled_at: at,
            original_scheduled_at: None,
            status: AppointmentStatus::Scheduled,
            confirmation_code: "K3Y9QX2A".to_string(),
            reschedule_count: 0,
            notes: None,
            attended_at: None,
            no_show_marked_at: None,
            auto_marked_as_no_show: false,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn default_body_mentions_time_and_code() {
        let message = render(&BranchPolicy::defaults(1), &appointment(), "ada@example.com", 24);
        assert_eq!(message.subject, REMINDER_SUBJECT);
        assert!(message.html_body.contains("2030-05-01 14:30 UTC"));
        assert!(message.html_body.contains("K3Y9QX2A"));
        assert!(message.html_body.contains("about 24 hours"));
        assert!(message.html_body.contains("Ada &lt;Lovelace&gt;"));
    }

    #[test]
    fn branch_template_placeholders_are_substituted() {
        let mut policy = BranchPolicy::defaults(1);
        policy.reminder_message_template =
            Some("{customer_name}: {confirmation_code} in {hours}h".to_string());
        let message = render(&policy, &appointment(), "ada@example.com", 2);
        assert_eq!(message.html_body, "Ada &lt;Lovelace&gt;: K3Y9QX2A in 2h");
    }
}
