//! Identity provider seam: sign-up, sign-in, password flows.

use super::error::IdentityError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A named user attribute such as `email` or `sub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAttribute {
    pub name: String,
    pub value: String,
}

impl UserAttribute {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Look up an attribute by name.
pub fn attribute<'a>(attributes: &'a [UserAttribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.as_str())
}

/// Tokens issued on successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Result of a sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(AuthTokens),
    /// Temporary password must be replaced; `session` continues the challenge.
    NewPasswordRequired { session: String },
}

/// Where a confirmation or reset code was sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeDelivery {
    pub destination: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &[UserAttribute],
    ) -> Result<CodeDelivery, IdentityError>;

    async fn confirm_registration(&self, username: &str, code: &str) -> Result<(), IdentityError>;

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, IdentityError>;

    async fn complete_new_password(
        &self,
        username: &str,
        session: &str,
        new_password: &str,
    ) -> Result<AuthTokens, IdentityError>;

    async fn user_attributes(&self, access_token: &str) -> Result<Vec<UserAttribute>, IdentityError>;

    async fn forgot_password(&self, username: &str) -> Result<CodeDelivery, IdentityError>;

    async fn confirm_password(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), IdentityError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;
}

/// Pool password policy: 8 characters with a digit, a symbol, an upper and a lower case letter.
pub fn check_password_policy(password: &str) -> Result<(), IdentityError> {
    let ok = password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace());
    if ok {
        Ok(())
    } else {
        Err(IdentityError::InvalidPassword(
            "Password did not conform with policy".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
struct PoolUser {
    password: String,
    attributes: Vec<UserAttribute>,
    confirmed: bool,
    force_change: bool,
    confirmation_code: Option<String>,
    reset_code: Option<String>,
}

#[derive(Debug, Default)]
struct PoolState {
    users: HashMap<String, PoolUser>,
    tokens: HashMap<String, String>,
    challenges: HashMap<String, String>,
    issued: u64,
}

impl PoolState {
    fn next(&mut self, prefix: &str, username: &str) -> String {
        self.issued += 1;
        format!("{}-{}-{}", prefix, username, self.issued)
    }

    fn code(&mut self) -> String {
        self.issued += 1;
        format!("{:06}", 100_000 + self.issued % 900_000)
    }

    fn user(&mut self, username: &str) -> Result<&mut PoolUser, IdentityError> {
        self.users
            .get_mut(username)
            .ok_or_else(|| IdentityError::UserNotFound(username.to_string()))
    }

    fn issue(&mut self, username: &str) -> AuthTokens {
        let access_token = self.next("access", username);
        self.tokens.insert(access_token.clone(), username.to_string());
        AuthTokens {
            access_token,
            id_token: None,
            refresh_token: None,
        }
    }
}

/// In-process user pool with deterministic codes.
#[derive(Debug, Default)]
pub struct MemoryIdentityPool {
    state: Mutex<PoolState>,
}

impl MemoryIdentityPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a confirmed user, as an administrator would.
    pub fn add_user(&self, username: &str, password: &str, email: &str) {
        self.insert(username, password, email, false);
    }

    /// Add a user whose temporary password must be replaced at first sign-in.
    pub fn add_user_with_temporary_password(&self, username: &str, password: &str, email: &str) {
        self.insert(username, password, email, true);
    }

    fn insert(&self, username: &str, password: &str, email: &str, force_change: bool) {
        let mut state = self.state();
        let sub = state.next("sub", username);
        state.users.insert(
            username.to_string(),
            PoolUser {
                password: password.to_string(),
                attributes: vec![UserAttribute::new("email", email), UserAttribute::new("sub", &sub)],
                confirmed: true,
                force_change,
                confirmation_code: None,
                reset_code: None,
            },
        );
    }

    /// Code sent to the user at sign-up, if still unconfirmed.
    pub fn confirmation_code(&self, username: &str) -> Option<String> {
        self.state().users.get(username)?.confirmation_code.clone()
    }

    /// Code sent to the user by a password reset request.
    pub fn reset_code(&self, username: &str) -> Option<String> {
        self.state().users.get(username)?.reset_code.clone()
    }

    pub fn is_confirmed(&self, username: &str) -> bool {
        self.state().users.get(username).is_some_and(|u| u.confirmed)
    }

    pub fn active_tokens(&self) -> usize {
        self.state().tokens.len()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityPool {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &[UserAttribute],
    ) -> Result<CodeDelivery, IdentityError> {
        if username.trim().is_empty() {
            return Err(IdentityError::InvalidParameter(
                "username must not be empty".to_string(),
            ));
        }
        check_password_policy(password)?;
        let mut state = self.state();
        if state.users.contains_key(username) {
            return Err(IdentityError::UsernameExists(username.to_string()));
        }
        let code = state.code();
        let sub = state.next("sub", username);
        let mut attrs = attributes.to_vec();
        attrs.push(UserAttribute::new("sub", &sub));
        let destination = attribute(&attrs, "email").map(str::to_string);
        state.users.insert(
            username.to_string(),
            PoolUser {
                password: password.to_string(),
                attributes: attrs,
                confirmed: false,
                force_change: false,
                confirmation_code: Some(code),
                reset_code: None,
            },
        );
        Ok(CodeDelivery { destination })
    }

    async fn confirm_registration(&self, username: &str, code: &str) -> Result<(), IdentityError> {
        let mut state = self.state();
        let user = state.user(username)?;
        if user.confirmed {
            return Err(IdentityError::NotAuthorized(
                "User cannot be confirmed. Current status is CONFIRMED".to_string(),
            ));
        }
        if code.trim().is_empty() {
            return Err(IdentityError::InvalidParameter(
                "confirmation code must not be empty".to_string(),
            ));
        }
        if user.confirmation_code.as_deref() != Some(code) {
            return Err(IdentityError::CodeMismatch);
        }
        user.confirmed = true;
        user.confirmation_code = None;
        Ok(())
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, IdentityError> {
        let mut state = self.state();
        let user = match state.users.get(username) {
            Some(u) if u.password == password => u,
            _ => {
                return Err(IdentityError::NotAuthorized(
                    "Incorrect username or password.".to_string(),
                ))
            }
        };
        if !user.confirmed {
            return Err(IdentityError::UserNotConfirmed);
        }
        if user.force_change {
            let session = state.next("challenge", username);
            state.challenges.insert(session.clone(), username.to_string());
            return Ok(AuthOutcome::NewPasswordRequired { session });
        }
        Ok(AuthOutcome::Authenticated(state.issue(username)))
    }

    async fn complete_new_password(
        &self,
        username: &str,
        session: &str,
        new_password: &str,
    ) -> Result<AuthTokens, IdentityError> {
        let mut state = self.state();
        if state.challenges.get(session).map(String::as_str) != Some(username) {
            return Err(IdentityError::NotAuthorized("Invalid session for the user.".to_string()));
        }
        check_password_policy(new_password)?;
        state.challenges.remove(session);
        let user = state.user(username)?;
        user.password = new_password.to_string();
        user.force_change = false;
        Ok(state.issue(username))
    }

    async fn user_attributes(&self, access_token: &str) -> Result<Vec<UserAttribute>, IdentityError> {
        let state = self.state();
        let username = state
            .tokens
            .get(access_token)
            .ok_or_else(|| IdentityError::NotAuthorized("Invalid Access Token".to_string()))?;
        state
            .users
            .get(username)
            .map(|u| u.attributes.clone())
            .ok_or_else(|| IdentityError::UserNotFound(username.clone()))
    }

    async fn forgot_password(&self, username: &str) -> Result<CodeDelivery, IdentityError> {
        let mut state = self.state();
        let code = state.code();
        let user = state.user(username)?;
        user.reset_code = Some(code);
        Ok(CodeDelivery {
            destination: attribute(&user.attributes, "email").map(str::to_string),
        })
    }

    async fn confirm_password(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        let mut state = self.state();
        let user = state.user(username)?;
        if user.reset_code.is_none() || user.reset_code.as_deref() != Some(code) {
            return Err(IdentityError::CodeMismatch);
        }
        check_password_policy(new_password)?;
        user.password = new_password.to_string();
        user.reset_code = None;
        Ok(())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let mut state = self.state();
        let username = state
            .tokens
            .remove(access_token)
            .ok_or_else(|| IdentityError::NotAuthorized("Access Token has been revoked".to_string()))?;
        // Global sign-out revokes every token of the user
        state.tokens.retain(|_, u| *u != username);
        Ok(())
    }
}
