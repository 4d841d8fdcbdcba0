//! OS identity lookups.
//!
//! Ownership is recorded and restored by *name*, so a restore on another
//! machine maps to that machine's ids. A name that does not resolve is an
//! error; there is no fallback identity.

use std::path::Path;

use nix::unistd::{Gid, Group, Uid, User};

use crate::error::{KeybankError, Result};

pub trait IdentityResolver {
    fn user_name(&self, uid: u32) -> Result<String>;
    fn group_name(&self, gid: u32) -> Result<String>;
    fn uid(&self, name: &str) -> Result<u32>;
    fn gid(&self, name: &str) -> Result<u32>;

    /// Name of the user running this process.
    fn current_user(&self) -> Result<String> {
        self.user_name(nix::unistd::getuid().as_raw())
    }
}

/// Resolves against the system's passwd and group databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentityResolver for SystemIdentity {
    fn user_name(&self, uid: u32) -> Result<String> {
        User::from_uid(Uid::from_raw(uid))?
            .map(|u| u.name)
            .ok_or_else(|| KeybankError::Identity(format!("no user with uid {uid}")))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        Group::from_gid(Gid::from_raw(gid))?
            .map(|g| g.name)
            .ok_or_else(|| KeybankError::Identity(format!("no group with gid {gid}")))
    }

    fn uid(&self, name: &str) -> Result<u32> {
        User::from_name(name)?
            .map(|u| u.uid.as_raw())
            .ok_or_else(|| KeybankError::Identity(format!("cannot find user {name}")))
    }

    fn gid(&self, name: &str) -> Result<u32> {
        Group::from_name(name)?
            .map(|g| g.gid.as_raw())
            .ok_or_else(|| KeybankError::Identity(format!("cannot find group {name}")))
    }
}

/// Numeric ownership resolved from names; `None` leaves that id unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Ownership {
    pub fn resolve(
        identity: &dyn IdentityResolver,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            uid: owner.map(|name| identity.uid(name)).transpose()?,
            gid: group.map(|name| identity.gid(name)).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }

    pub fn apply(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        nix::unistd::chown(path, self.uid.map(Uid::from_raw), self.gid.map(Gid::from_raw))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_system_identity_roundtrip_current_user() {
        let identity = SystemIdentity;
        let uid = nix::unistd::getuid().as_raw();
        let name = identity.user_name(uid).unwrap();
        assert_eq!(identity.uid(&name).unwrap(), uid);
        assert_eq!(identity.current_user().unwrap(), name);
    }

    #[test]
    fn test_unknown_user_is_error() {
        let identity = SystemIdentity;
        let err = identity.uid("no-such-user-keybank-test").unwrap_err();
        assert!(matches!(err, KeybankError::Identity(_)));
        assert!(identity.gid("no-such-group-keybank-test").is_err());
    }

    #[test]
    fn test_ownership_resolve_and_apply() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file");
        std::fs::write(&path, "x").unwrap();

        let ownership =
            Ownership::resolve(&fake::FakeIdentity, Some(fake::USER), Some(fake::GROUP)).unwrap();
        ownership.apply(&path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(Some(meta.uid()), ownership.uid);
        assert_eq!(Some(meta.gid()), ownership.gid);
    }

    #[test]
    fn test_ownership_resolution_fails_fast() {
        let result = Ownership::resolve(&fake::FakeIdentity, Some("nobody-here"), None);
        assert!(matches!(result, Err(KeybankError::Identity(_))));
        assert!(Ownership::resolve(&fake::FakeIdentity, None, None)
            .unwrap()
            .is_empty());
    }
}
