//! The authenticated caller every operation is scoped to

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the user on whose behalf an operation runs.
///
/// Records are owned by `user_id`; a record owned by anyone else is invisible
/// to this principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id)
    }
}
