use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::observability;

/// The single login the server accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug)]
pub struct CoversAuthSource {
    credentials: Credentials,
}

impl CoversAuthSource {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn user_matches(&self, login: &LoginInfo) -> bool {
        login.user() == Some(self.credentials.user.as_str())
    }
}

#[async_trait]
impl AuthSource for CoversAuthSource {
    /// Unknown users fail before the password exchange; the cleartext
    /// handler compares the password.
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if !self.user_matches(login) {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("login refused for user {:?}", login.user());
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28P01".into(),
                "password authentication failed".into(),
            ))));
        }
        Ok(Password::new(None, self.credentials.password.as_bytes().to_vec()))
    }
}
