use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every user and tenant database.
#[derive(Debug)]
pub struct GridlaneAuthSource {
    secret: Vec<u8>,
}

impl GridlaneAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            secret: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for GridlaneAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        // cleartext auth, so no salt
        Ok(Password::new(None, self.secret.clone()))
    }
}
