//! The authenticated identity of a connection (spec §3 "Authenticator").

use crate::model::Tag;

/// The authenticated entity behind a connection. Immutable after login
/// (spec §3 invariant: "an authenticator's tag cannot change post-login").
pub trait Authenticator: Send + Sync + std::fmt::Debug + 'static {
    fn tag(&self) -> &Tag;
    fn is_client(&self) -> bool;
    fn is_machine_agent(&self) -> bool;
    fn is_unit_agent(&self) -> bool;
    fn is_environ_manager(&self) -> bool;

    /// `true` iff the authenticator's tag equals `target`.
    fn auth_owner(&self, target: &Tag) -> bool {
        self.tag() == target
    }
}

/// A human operator. `is_environ_manager` is always `false` — only machine
/// agents carry environment-management jobs.
#[derive(Debug, Clone)]
pub struct UserAuthenticator {
    tag: Tag,
}

impl UserAuthenticator {
    pub fn new(tag: Tag) -> Self {
        debug_assert!(tag.is_user());
        Self { tag }
    }
}

impl Authenticator for UserAuthenticator {
    fn tag(&self) -> &Tag {
        &self.tag
    }
    fn is_client(&self) -> bool {
        true
    }
    fn is_machine_agent(&self) -> bool {
        false
    }
    fn is_unit_agent(&self) -> bool {
        false
    }
    fn is_environ_manager(&self) -> bool {
        false
    }
}

/// A machine or unit agent. `jobs` records the provisioned jobs for a
/// machine agent (spec §3's "a machine whose jobs include environment
/// management"); empty for unit agents.
#[derive(Debug, Clone)]
pub struct AgentAuthenticator {
    tag: Tag,
    jobs: Vec<AgentJob>,
}

/// The provisioning jobs a machine agent may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentJob {
    HostUnits,
    ManageEnviron,
}

impl AgentAuthenticator {
    pub fn machine(tag: Tag, jobs: Vec<AgentJob>) -> Self {
        debug_assert!(tag.is_machine());
        Self { tag, jobs }
    }

    pub fn unit(tag: Tag) -> Self {
        debug_assert!(tag.is_unit());
        Self { tag, jobs: Vec::new() }
    }

    pub fn jobs(&self) -> &[AgentJob] {
        &self.jobs
    }
}

impl Authenticator for AgentAuthenticator {
    fn tag(&self) -> &Tag {
        &self.tag
    }
    fn is_client(&self) -> bool {
        false
    }
    fn is_machine_agent(&self) -> bool {
        self.tag.is_machine()
    }
    fn is_unit_agent(&self) -> bool {
        self.tag.is_unit()
    }
    fn is_environ_manager(&self) -> bool {
        self.tag.is_machine() && self.jobs.contains(&AgentJob::ManageEnviron)
    }
}

/// The identity behind an empty-tag login (spec §8's boundary scenario: the
/// wire's empty tag, `Tag::Environment`, logs in successfully but owns no
/// capability — every non-`Admin.Login` call on the resulting connection is
/// rejected as `NotLoggedIn` by the caller of `check_credentials`, not by
/// anything on this type).
#[derive(Debug, Clone)]
pub struct AnonymousAuthenticator(Tag);

impl Default for AnonymousAuthenticator {
    fn default() -> Self {
        Self(Tag::Environment)
    }
}

impl Authenticator for AnonymousAuthenticator {
    fn tag(&self) -> &Tag {
        &self.0
    }
    fn is_client(&self) -> bool {
        false
    }
    fn is_machine_agent(&self) -> bool {
        false
    }
    fn is_unit_agent(&self) -> bool {
        false
    }
    fn is_environ_manager(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_manager_requires_the_job_and_a_machine_tag() {
        let plain = AgentAuthenticator::machine(Tag::Machine(0), vec![AgentJob::HostUnits]);
        assert!(!plain.is_environ_manager());

        let manager =
            AgentAuthenticator::machine(Tag::Machine(1), vec![AgentJob::ManageEnviron]);
        assert!(manager.is_environ_manager());
        assert!(manager.is_machine_agent());
        assert!(!manager.is_client());
    }

    #[test]
    fn auth_owner_matches_only_exact_tag() {
        let user = UserAuthenticator::new(Tag::User("admin".into()));
        assert!(user.auth_owner(&Tag::User("admin".into())));
        assert!(!user.auth_owner(&Tag::User("bob".into())));
    }
}
