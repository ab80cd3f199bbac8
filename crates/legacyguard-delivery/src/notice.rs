//! Email copy for unlock notifications.

use legacyguard_core::types::{OutgoingEmail, TrustedPerson};

/// Render the unlock notice sent to one recipient.
pub fn unlock_notice(
    recipient: &TrustedPerson,
    sender_name: &str,
    capsule_title: &str,
    app_url: &str,
) -> OutgoingEmail {
    let subject = format!("{sender_name} has left a message for you");
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>You have a new message from {sender_name}</h2>
  <p>Dear {recipient_name},</p>
  <p>{sender_name} has left a time capsule message for you: "{capsule_title}"</p>
  <p>Log in to LegacyGuard to view this special message.</p>
  <div style="margin: 30px 0;">
    <a href="{app_url}/messages"
       style="background-color: #4F46E5; color: white; padding: 12px 24px;
              text-decoration: none; border-radius: 6px; display: inline-block;">
      View Message
    </a>
  </div>
  <p>Best regards,<br>The LegacyGuard Team</p>
</div>"#,
        recipient_name = recipient.name,
    );
    let text = format!(
        "Dear {recipient_name},\n\n\
         {sender_name} has left a time capsule message for you: \"{capsule_title}\"\n\n\
         Log in to LegacyGuard to view this special message: {app_url}/messages\n\n\
         Best regards,\nThe LegacyGuard Team",
        recipient_name = recipient.name,
    );

    OutgoingEmail {
        to_email: recipient.email.clone(),
        to_name: recipient.name.clone(),
        subject,
        html,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_notice_copy() {
        let recipient = TrustedPerson {
            id: "tp-1".into(),
            user_id: "u-1".into(),
            name: "Maria".into(),
            email: "maria@example.com".into(),
            relationship: "daughter".into(),
            is_emergency_contact: false,
            created_at: Utc::now(),
        };
        let email = unlock_notice(&recipient, "Jan Novak", "Our summer", "https://app.example");
        assert_eq!(email.subject, "Jan Novak has left a message for you");
        assert!(email.html.contains("Dear Maria,"));
        assert!(email.html.contains("https://app.example/messages"));
        assert!(email.text.contains("\"Our summer\""));
        assert_eq!(email.to_email, "maria@example.com");
    }
}
