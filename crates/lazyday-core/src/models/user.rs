use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// JWT issued at sign-in; absent on user records returned by profile patches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    /// Server responses may omit the token; keep the one we already hold.
    pub fn with_token_from(mut self, other: &User) -> Self {
        if self.token.is_none() {
            self.token = other.token.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_payload() {
        let json = r#"{"id": 7, "email": "jo@example.com", "name": "Jo", "token": "abc"}"#;
        let user: User = serde_json::from_str(json).expect("valid user json");
        assert_eq!(user.id, 7);
        assert_eq!(user.display_name(), "Jo");
        assert_eq!(user.token.as_deref(), Some("abc"));
        assert!(user.phone.is_none());
    }

    #[test]
    fn test_serialize_skips_absent_fields() {
        let user = User {
            id: 1,
            email: "a@b.c".to_string(),
            name: None,
            address: None,
            phone: None,
            token: None,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value, serde_json::json!({"id": 1, "email": "a@b.c"}));
        assert_eq!(user.display_name(), "a@b.c");
    }

    #[test]
    fn test_with_token_from_keeps_existing_token() {
        let cached = User {
            id: 1,
            email: "a@b.c".to_string(),
            name: None,
            address: None,
            phone: None,
            token: Some("jwt".to_string()),
        };
        let from_server = User { token: None, name: Some("A".to_string()), ..cached.clone() };
        let merged = from_server.with_token_from(&cached);
        assert_eq!(merged.token.as_deref(), Some("jwt"));
        assert_eq!(merged.name.as_deref(), Some("A"));
    }
}
