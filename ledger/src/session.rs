use core_types::types::AccountId;

use crate::error::{LedgerError, Result};

/// Who is making a ledger call. Terminal transitions record the actor in
/// the audit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Customer(AccountId),
    Admin(String),
    System(&'static str),
}

impl Actor {
    /// Operators (admins and system engines) may resolve orders and trades.
    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Admin(_) | Actor::System(_))
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Actor::Customer(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Customer(id) => write!(f, "customer:{id}"),
            Actor::Admin(label) => write!(f, "admin:{label}"),
            Actor::System(label) => write!(f, "system:{label}"),
        }
    }
}

/// Explicit per-call context. There is no ambient current user; every
/// operation takes the session it acts for.
#[derive(Debug, Clone)]
pub struct Session {
    actor: Actor,
}

impl Session {
    pub fn customer(account_id: impl Into<AccountId>) -> Self {
        Self {
            actor: Actor::Customer(account_id.into()),
        }
    }

    pub fn admin(label: impl Into<String>) -> Self {
        Self {
            actor: Actor::Admin(label.into()),
        }
    }

    pub fn system(label: &'static str) -> Self {
        Self {
            actor: Actor::System(label),
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// The customer account this session acts for; operators have none.
    pub fn require_account(&self, action: &'static str) -> Result<&AccountId> {
        self.actor
            .account_id()
            .ok_or_else(|| LedgerError::NotPermitted {
                actor: self.actor.to_string(),
                action,
            })
    }
}
