use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Role;

/// One password per role. The login user name picks the role.
#[derive(Debug, Clone)]
pub struct Passwords {
    pub admin: String,
    pub editor: String,
    pub user: String,
}

impl Passwords {
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin,
            Role::Editor => &self.editor,
            Role::User => &self.user,
        }
    }
}

#[derive(Debug)]
pub struct ReservdAuthSource {
    passwords: Passwords,
}

impl ReservdAuthSource {
    pub fn new(passwords: Passwords) -> Self {
        Self { passwords }
    }
}

#[async_trait]
impl AuthSource for ReservdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let role = Role::from_user(login.user());
        let password = self.passwords.for_role(role);
        Ok(Password::new(None, password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_role_has_its_own_password() {
        let passwords = Passwords {
            admin: "a".into(),
            editor: "e".into(),
            user: "u".into(),
        };
        assert_eq!(passwords.for_role(Role::from_user(Some("admin"))), "a");
        assert_eq!(passwords.for_role(Role::from_user(Some("editor"))), "e");
        assert_eq!(passwords.for_role(Role::from_user(Some("guest"))), "u");
        assert_eq!(passwords.for_role(Role::from_user(None)), "u");
    }
}
