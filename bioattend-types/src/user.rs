//! Enrolled user records

use std::fmt;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};

/// User known to the attendance store
///
/// The user ID doubles as the template slot on the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Template slot / user identifier
    pub id: u32,
    
    /// Display name
    pub name: String,
    
    /// When the user was added
    pub created_at: DateTime<Local>,
}

impl User {
    /// Create a user, rejecting blank names
    pub fn new(id: u32, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        
        if trimmed.is_empty() {
            return Err(Error::Validation(format!("User {} has an empty name", id)));
        }
        
        Ok(Self {
            id,
            name: trimmed.to_string(),
            created_at: Local::now(),
        })
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User[{}: {}]", self.id, self.name)
    }
}
