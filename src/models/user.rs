//! User model for authentication.
//!
//! Users are provisioned by the external identity provider. This service
//! only reads them to resolve the subject of a bearer token.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Represents a row of the `auth_user` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub department_id: Option<i64>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_superuser: bool,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub oauth: bool,
    pub birth_date: Option<NaiveDate>,
    pub department: Option<String>,
    pub is_director: bool,
    pub id_country: Option<i64>,
}

impl User {
    /// Columns selected whenever a full user row is loaded.
    pub const COLUMNS: &'static str = "id, department_id, last_login, is_superuser, username, \
         first_name, last_name, email, is_staff, date_joined, company, \
         phone, oauth, birth_date, department, is_director, id_country";
}

#[cfg(test)]
pub(crate) fn sample_user() -> User {
    User {
        id: 640,
        department_id: Some(3),
        last_login: None,
        is_superuser: false,
        username: "m.araujo".to_string(),
        first_name: "Maria".to_string(),
        last_name: "Araujo".to_string(),
        email: "maria@example.com".to_string(),
        is_staff: true,
        date_joined: Utc::now(),
        company: Some("Energy Co".to_string()),
        phone: None,
        oauth: true,
        birth_date: None,
        department: Some("Trading".to_string()),
        is_director: false,
        id_country: Some(55),
    }
}
