use oso::PolarClass;
use serde::{Deserialize, Serialize};

use crate::entities::{Identity, MembershipStatus, Profile, Role, UserId};

/// The acting principal of a collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub roles: Vec<String>,
    pub membership: MembershipStatus,
}

impl User {
    /// An authenticated identity whose profile is not loaded yet.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            roles: vec![],
            membership: MembershipStatus::missing(),
        }
    }

    pub fn from_profile(profile: &Profile) -> Self {
        let mut roles = vec![Role::Member.name()];
        if profile.is_admin() {
            roles.push(Role::Admin.name());
        }

        Self {
            id: profile.id.clone(),
            roles,
            membership: profile.membership_status.clone(),
        }
    }

    pub fn new_admin_user(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            roles: vec![Role::Member.name(), Role::Admin.name()],
            membership: MembershipStatus::Approved,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin.name())
    }

    fn has_role(&self, role: String) -> bool {
        self.roles.iter().find(|&x| x == &role).is_some()
    }

    fn is_approved(&self) -> bool {
        self.membership == MembershipStatus::Approved
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id.clone())
            .add_attribute_getter("roles", |recv: &User| recv.roles.clone())
            .add_attribute_getter("membership", |recv: &User| recv.membership.name())
            .add_method("has_role", User::has_role)
            .add_method("is_approved", User::is_approved)
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}
