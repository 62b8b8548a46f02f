use crate::api::FleetApi;
use crate::error::{MaintError, Result};
use crate::types::{Entitlement, SystemRef, TargetSystem};
use tracing::debug;

/// Days without check-in after which a system counts as inactive.
pub const INACTIVE_DAYS: u32 = 1;

/// Resolve `hostname` to exactly one registered system and snapshot it.
pub fn lookup_target(api: &dyn FleetApi, hostname: &str) -> Result<TargetSystem> {
    let system = resolve_system(api, hostname)?;
    let details = api.get_details(system.id)?;
    let base_channel = api
        .get_subscribed_base_channel(system.id)?
        .unwrap_or_default();
    let child_channels = api.list_subscribed_child_channels(system.id)?;
    let inactive = api
        .list_inactive_systems(INACTIVE_DAYS)?
        .iter()
        .any(|s| s.id == system.id);

    let target = TargetSystem {
        id: system.id,
        hostname: hostname.to_string(),
        base_channel,
        child_channels,
        entitlement: Entitlement::from_base_entitlement(&details.base_entitlement),
        inactive,
    };
    debug!(
        system_id = %target.id,
        base_channel = %target.base_channel,
        entitlement = %target.entitlement,
        "target resolved"
    );
    Ok(target)
}

fn resolve_system(api: &dyn FleetApi, hostname: &str) -> Result<SystemRef> {
    let mut found = api.get_system_ids(hostname)?;
    match found.len() {
        0 => Err(MaintError::SystemNotFound(hostname.to_string())),
        1 => Ok(found.remove(0)),
        n => Err(MaintError::DuplicateSystem(hostname.to_string(), n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakeApi;
    use crate::types::SystemId;

    #[test]
    fn resolves_snapshot() {
        let api = FakeApi::new()
            .with_system(1000010000, "web01")
            .with_channels("prodX-sp3-x86_64", &["prodX-sp3-updates-x86_64"]);
        let t = lookup_target(&api, "WEB01").unwrap();
        assert_eq!(t.id, SystemId(1000010000));
        assert_eq!(t.hostname, "WEB01");
        assert_eq!(t.base_channel, "prodX-sp3-x86_64");
        assert!(t.is_agent_managed());
        assert!(!t.inactive);
    }

    #[test]
    fn unknown_and_duplicate_hosts() {
        let api = FakeApi::new().with_system(1000010000, "web01");
        assert!(matches!(
            lookup_target(&api, "db01"),
            Err(MaintError::SystemNotFound(_))
        ));

        let api = FakeApi::new()
            .with_system(1000010000, "web01")
            .with_duplicate_system();
        assert!(matches!(
            lookup_target(&api, "web01"),
            Err(MaintError::DuplicateSystem(_, 2))
        ));
    }

    #[test]
    fn inactive_flag_and_classic_entitlement() {
        let api = FakeApi::new()
            .with_system(1000010000, "legacy01")
            .with_entitlement("enterprise_entitled")
            .with_inactive(true);
        let t = lookup_target(&api, "legacy01").unwrap();
        assert!(t.inactive);
        assert!(!t.is_agent_managed());
    }
}
