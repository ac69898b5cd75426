//! Stable identifiers for server-side object instances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GanymedeError;

/// Identifies one persistent object: the numeric id of its type plus the
/// object number within that type. Rendered as `type:num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Invid {
    pub type_id: u16,
    pub num: u32,
}

impl Invid {
    pub fn new(type_id: u16, num: u32) -> Self {
        Self { type_id, num }
    }
}

impl fmt::Display for Invid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_id, self.num)
    }
}

impl FromStr for Invid {
    type Err = GanymedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, num_part) = s
            .split_once(':')
            .ok_or_else(|| GanymedeError::InvalidMessage(format!("invid '{s}' is not type:num")))?;

        let type_id = type_part
            .trim()
            .parse::<u16>()
            .map_err(|e| GanymedeError::InvalidMessage(format!("invid type in '{s}': {e}")))?;
        let num = num_part
            .trim()
            .parse::<u32>()
            .map_err(|e| GanymedeError::InvalidMessage(format!("invid number in '{s}': {e}")))?;

        Ok(Self { type_id, num })
    }
}
