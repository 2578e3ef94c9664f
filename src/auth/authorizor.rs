use oso::{Oso, PolarClass, ToPolar};

use crate::api::user_object_prefix;
use crate::auth::{Club, User};
use crate::entities::{Event, MembershipStatus, Profile, Role};
use crate::error::{unauthorized_error, Error};

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Club::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Event::get_polar_class())?;
    o.register_class(Profile::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

pub fn authorize<Actor, Action, Resource>(
    oso: &Oso,
    actor: Actor,
    action: Action,
    resource: Resource,
) -> Result<(), Error>
where
    Actor: ToPolar,
    Action: ToPolar,
    Resource: ToPolar,
{
    if oso.is_allowed(actor, action, resource)? {
        return Ok(());
    }

    Err(unauthorized_error())
}

/// Membership status and role are only ever changed by an admin; members
/// writing their own document must leave them as they were.
pub fn guard_profile_write(
    user: &User,
    existing: Option<&Profile>,
    profile: &Profile,
) -> Result<(), Error> {
    if user.is_admin() {
        return Ok(());
    }

    let (status, role) = match existing {
        Some(existing) => (&existing.membership_status, &existing.role),
        None => (&MembershipStatus::NotApplied, &Role::Member),
    };

    if &profile.membership_status != status || &profile.role != role {
        return Err(unauthorized_error());
    }

    Ok(())
}

/// Objects are private to the user whose id names their folder.
pub fn authorize_object(user: &User, path: &str) -> Result<(), Error> {
    if user.is_admin() || path.starts_with(&user_object_prefix(&user.id)) {
        return Ok(());
    }

    Err(unauthorized_error())
}

#[cfg(test)]
fn member(id: &str, status: crate::entities::MembershipStatus) -> User {
    User {
        id: id.into(),
        roles: vec!["member".into()],
        membership: status,
    }
}

#[test]
fn club_actions() {
    use crate::entities::MembershipStatus;

    let authorizor = new().unwrap();
    let admin = User::new_admin_user("admin");
    let approved = member("a", MembershipStatus::Approved);
    let pending = member("p", MembershipStatus::Pending);

    let result = authorizor.is_allowed(admin.clone(), "create_event", Club::default());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(approved.clone(), "create_event", Club::default());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(approved.clone(), "list_events", Club::default());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(pending.clone(), "list_events", Club::default());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(pending.clone(), "lookup_invite", Club::default());
    assert_eq!(result.unwrap(), true);
}

#[test]
fn event_actions() {
    use crate::entities::{sample_event, MembershipStatus};
    use chrono::Utc;

    let authorizor = new().unwrap();
    let event = sample_event(10, Utc::now());
    let admin = User::new_admin_user("admin");
    let approved = member("a", MembershipStatus::Approved);
    let rejected = member("r", MembershipStatus::Rejected);
    let unknown = member("u", MembershipStatus::Unrecognized("vip".into()));

    for action in ["read", "reserve", "cancel"] {
        let result = authorizor.is_allowed(approved.clone(), action, event.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(rejected.clone(), action, event.clone());
        assert_eq!(result.unwrap(), false);

        let result = authorizor.is_allowed(unknown.clone(), action, event.clone());
        assert_eq!(result.unwrap(), false);
    }

    for action in ["update", "delete"] {
        let result = authorizor.is_allowed(admin.clone(), action, event.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(approved.clone(), action, event.clone());
        assert_eq!(result.unwrap(), false);
    }
}

#[test]
fn profile_actions() {
    use crate::entities::{Identity, MembershipStatus, Profile};

    let authorizor = new().unwrap();
    let profile = Profile::new_default(&Identity::new("a", None, None), "Miami");
    let owner = User::from_identity(&Identity::new("a", None, None));
    let stranger = member("b", MembershipStatus::Approved);
    let admin = User::new_admin_user("admin");

    for action in ["read", "create", "update", "apply"] {
        let result = authorizor.is_allowed(owner.clone(), action, profile.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(stranger.clone(), action, profile.clone());
        assert_eq!(result.unwrap(), false);
    }

    let result = authorizor.is_allowed(owner.clone(), "review", profile.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(admin.clone(), "review", profile.clone());
    assert_eq!(result.unwrap(), true);

    assert_eq!(
        authorize(&authorizor, stranger, "read", profile).unwrap_err(),
        unauthorized_error()
    );
}

#[test]
fn members_cannot_promote_themselves() {
    use crate::entities::{Identity, MembershipStatus, Profile, Role};

    let identity = Identity::new("a", None, None);
    let owner = User::from_identity(&identity);
    let profile = Profile::new_default(&identity, "Miami");

    assert!(guard_profile_write(&owner, None, &profile).is_ok());

    let mut promoted = profile.clone();
    promoted.membership_status = MembershipStatus::Approved;
    assert!(guard_profile_write(&owner, Some(&profile), &promoted).is_err());

    promoted.membership_status = MembershipStatus::NotApplied;
    promoted.role = Role::Admin;
    assert!(guard_profile_write(&owner, Some(&profile), &promoted).is_err());

    let admin = User::new_admin_user("admin");
    assert!(guard_profile_write(&admin, Some(&profile), &promoted).is_ok());
}
