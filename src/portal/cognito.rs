//! Cognito user pool adapter.

use super::error::IdentityError;
use super::identity::{AuthOutcome, AuthTokens, CodeDelivery, IdentityProvider, UserAttribute};
use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::ProvideErrorMetadata;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType, ChallengeNameType};
use aws_sdk_cognitoidentityprovider::Client;

/// Identity provider backed by a Cognito app client.
#[derive(Debug, Clone)]
pub struct CognitoIdentityProvider {
    client: Client,
    client_id: String,
}

fn map_error<E: ProvideErrorMetadata>(err: E) -> IdentityError {
    IdentityError::from_name(
        err.code().unwrap_or("Unknown"),
        err.message().unwrap_or_default(),
    )
}

impl CognitoIdentityProvider {
    pub fn new(client: Client, client_id: &str) -> Self {
        Self {
            client,
            client_id: client_id.to_string(),
        }
    }

    /// Build a client for the pool's region from the default credential chain.
    pub async fn from_region(region: &str, client_id: &str) -> Self {
        let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&conf), client_id)
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentityProvider {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &[UserAttribute],
    ) -> Result<CodeDelivery, IdentityError> {
        let mut req = self
            .client
            .sign_up()
            .client_id(&self.client_id)
            .username(username)
            .password(password);
        for a in attributes {
            let attr = AttributeType::builder()
                .name(&a.name)
                .value(&a.value)
                .build()
                .map_err(|e| IdentityError::InvalidParameter(e.to_string()))?;
            req = req.user_attributes(attr);
        }
        let out = req.send().await.map_err(map_error)?;
        Ok(CodeDelivery {
            destination: out
                .code_delivery_details()
                .and_then(|d| d.destination())
                .map(str::to_string),
        })
    }

    async fn confirm_registration(&self, username: &str, code: &str) -> Result<(), IdentityError> {
        self.client
            .confirm_sign_up()
            .client_id(&self.client_id)
            .username(username)
            .confirmation_code(code)
            .force_alias_creation(true)
            .send()
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, IdentityError> {
        let out = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", username)
            .auth_parameters("PASSWORD", password)
            .send()
            .await
            .map_err(map_error)?;
        if out.challenge_name() == Some(&ChallengeNameType::NewPasswordRequired) {
            return Ok(AuthOutcome::NewPasswordRequired {
                session: out.session().unwrap_or_default().to_string(),
            });
        }
        let result = out
            .authentication_result()
            .ok_or_else(|| IdentityError::Service("no authentication result".to_string()))?;
        Ok(AuthOutcome::Authenticated(AuthTokens {
            access_token: result.access_token().unwrap_or_default().to_string(),
            id_token: result.id_token().map(str::to_string),
            refresh_token: result.refresh_token().map(str::to_string),
        }))
    }

    async fn complete_new_password(
        &self,
        username: &str,
        session: &str,
        new_password: &str,
    ) -> Result<AuthTokens, IdentityError> {
        let out = self
            .client
            .respond_to_auth_challenge()
            .client_id(&self.client_id)
            .challenge_name(ChallengeNameType::NewPasswordRequired)
            .session(session)
            .challenge_responses("USERNAME", username)
            .challenge_responses("NEW_PASSWORD", new_password)
            .send()
            .await
            .map_err(map_error)?;
        let result = out
            .authentication_result()
            .ok_or_else(|| IdentityError::Service("challenge not completed".to_string()))?;
        Ok(AuthTokens {
            access_token: result.access_token().unwrap_or_default().to_string(),
            id_token: result.id_token().map(str::to_string),
            refresh_token: result.refresh_token().map(str::to_string),
        })
    }

    async fn user_attributes(&self, access_token: &str) -> Result<Vec<UserAttribute>, IdentityError> {
        let out = self
            .client
            .get_user()
            .access_token(access_token)
            .send()
            .await
            .map_err(map_error)?;
        Ok(out
            .user_attributes()
            .iter()
            .map(|a| UserAttribute::new(a.name(), a.value().unwrap_or_default()))
            .collect())
    }

    async fn forgot_password(&self, username: &str) -> Result<CodeDelivery, IdentityError> {
        let out = self
            .client
            .forgot_password()
            .client_id(&self.client_id)
            .username(username)
            .send()
            .await
            .map_err(map_error)?;
        Ok(CodeDelivery {
            destination: out
                .code_delivery_details()
                .and_then(|d| d.destination())
                .map(str::to_string),
        })
    }

    async fn confirm_password(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        self.client
            .confirm_forgot_password()
            .client_id(&self.client_id)
            .username(username)
            .confirmation_code(code)
            .password(new_password)
            .send()
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        self.client
            .global_sign_out()
            .access_token(access_token)
            .send()
            .await
            .map_err(map_error)?;
        Ok(())
    }
}
