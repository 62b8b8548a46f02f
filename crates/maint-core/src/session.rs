//! Remote session lifetime.

use crate::api::FleetApi;
use crate::error::Result;
use std::ops::Deref;
use tracing::{debug, warn};

/// Logged-in session; logs out when dropped, on every exit path.
pub struct SessionGuard<'a> {
    api: &'a dyn FleetApi,
}

impl<'a> SessionGuard<'a> {
    pub fn login(api: &'a dyn FleetApi) -> Result<Self> {
        api.login()?;
        debug!("session opened");
        Ok(Self { api })
    }
}

impl<'a> Deref for SessionGuard<'a> {
    type Target = dyn FleetApi + 'a;

    fn deref(&self) -> &Self::Target {
        self.api
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        match self.api.logout() {
            Ok(()) => debug!("session closed"),
            Err(e) => warn!("logout failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakeApi;

    #[test]
    fn logout_on_drop() {
        let api = FakeApi::new();
        {
            let session = SessionGuard::login(&api).unwrap();
            assert!(api.is_logged_in());
            session.list_software_channels().unwrap();
        }
        assert!(!api.is_logged_in());
        assert_eq!(api.logouts(), 1);
    }

    #[test]
    fn logout_on_early_return() {
        fn failing(api: &FakeApi) -> Result<()> {
            let _session = SessionGuard::login(api)?;
            Err(crate::error::MaintError::PreconditionViolation("excluded".to_string()))
        }
        let api = FakeApi::new();
        assert!(failing(&api).is_err());
        assert_eq!(api.logouts(), 1);
    }

    #[test]
    fn group_listing_through_session() {
        let api = FakeApi::new().with_group("web", &[(1, "web01"), (2, "web02")]);
        let names: Vec<String> = {
            let session = SessionGuard::login(&api).unwrap();
            session
                .list_group_systems("web")
                .unwrap()
                .into_iter()
                .map(|s| s.name)
                .collect()
        };
        assert_eq!(names, vec!["web01", "web02"]);
        assert!(!api.is_logged_in());
    }
}
