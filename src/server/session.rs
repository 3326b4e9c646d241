use crate::directory::Principal;

/// Per-connection bind state. A connection starts out anonymous.
#[derive(Debug)]
pub struct LdapSession {
    principal: Principal,
    bound: bool,
}

impl Default for LdapSession {
    fn default() -> Self {
        Self {
            principal: Principal::Anonymous,
            bound: false,
        }
    }
}

impl LdapSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, principal: Principal) {
        self.principal = principal;
        self.bound = true;
    }

    /// A failed bind leaves the connection anonymous.
    pub fn reset(&mut self) {
        self.principal = Principal::Anonymous;
        self.bound = false;
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn bound_dn(&self) -> Option<String> {
        match &self.principal {
            Principal::Anonymous => None,
            other => Some(other.name()),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }
}
