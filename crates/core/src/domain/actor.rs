use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Attendant,
    Accountant,
    Manager,
    Director,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Attendant, Role::Accountant, Role::Manager, Role::Director];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attendant => "attendant",
            Self::Accountant => "accountant",
            Self::Manager => "manager",
            Self::Director => "director",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "attendant" => Some(Self::Attendant),
            "accountant" => Some(Self::Accountant),
            "manager" => Some(Self::Manager),
            "director" => Some(Self::Director),
            _ => None,
        }
    }

    /// Roles allowed to deduct or refill tanks outside of an approval.
    pub fn manages_inventory(&self) -> bool {
        matches!(self, Self::Manager | Self::Director)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity resolved by the authentication layer. Trusted as already verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: ActorId(id.into()), role }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" Manager "), Some(Role::Manager));
        assert_eq!(Role::parse("cashier"), None);
    }

    #[test]
    fn only_managers_and_directors_manage_inventory() {
        let managers: Vec<Role> =
            Role::ALL.into_iter().filter(|role| role.manages_inventory()).collect();
        assert_eq!(managers, vec![Role::Manager, Role::Director]);
    }
}
