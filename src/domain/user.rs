//! Platform users.

use chrono::NaiveDateTime;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use crate::domain::error::QuantdeskError;
use crate::domain::subscription::SubscriptionState;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// PHC-format argon2 hash; never serialised.
    pub password_hash: String,
    pub created_at: NaiveDateTime,
    pub subscription: SubscriptionState,
    pub stripe_customer_id: Option<String>,
}

impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("User", 7)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("username", &self.username)?;
        s.serialize_field("email", &self.email)?;
        s.serialize_field("subscription_tier", &self.subscription.tier)?;
        s.serialize_field("subscription_start_date", &self.subscription.start_date)?;
        s.serialize_field("subscription_end_date", &self.subscription.end_date)?;
        s.serialize_field("created_at", &self.created_at)?;
        s.end()
    }
}

/// Registration input after validation.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Checks registration fields before hashing the password.
pub fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), QuantdeskError> {
    if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(QuantdeskError::validation("Missing required fields"));
    }
    if username.trim().len() > 80 {
        return Err(QuantdeskError::validation("Username must be at most 80 characters"));
    }
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email || email.len() > 120 {
        return Err(QuantdeskError::validation("Invalid email address"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(QuantdeskError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::Tier;
    use chrono::NaiveDate;
    use serde_json::json;

    fn sample_user() -> User {
        User {
            id: 3,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            subscription: SubscriptionState::default(),
            stripe_customer_id: Some("cus_1".into()),
        }
    }

    #[test]
    fn serialization_hides_secrets() {
        let value = serde_json::to_value(sample_user()).unwrap();
        assert_eq!(value["username"], json!("alice"));
        assert_eq!(value["subscription_tier"], json!("free"));
        assert_eq!(value["created_at"], json!("2024-02-01T08:30:00"));
        assert!(value.get("password_hash").is_none());
        assert!(value.get("stripe_customer_id").is_none());
    }

    #[test]
    fn serialization_reports_tier() {
        let mut user = sample_user();
        user.subscription.tier = Tier::Enterprise;
        let value = serde_json::to_value(user).unwrap();
        assert_eq!(value["subscription_tier"], json!("enterprise"));
    }

    #[test]
    fn registration_requires_all_fields() {
        let err = validate_registration("", "a@b.io", "password1").unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields");
        assert!(validate_registration("bob", "", "password1").is_err());
        assert!(validate_registration("bob", "a@b.io", "").is_err());
    }

    #[test]
    fn registration_checks_email_and_password() {
        assert!(validate_registration("bob", "not-an-email", "password1").is_err());
        assert!(validate_registration("bob", "bob@example.com", "short").is_err());
        assert!(validate_registration("bob", "bob@example.com", "long enough").is_ok());
    }
}
