use super::client::{ApiRequest, SessionClient};
use super::error::{ApiError, FieldErrors};
use super::session::LogoutReason;
use super::types::{LoginRequest, RegisterRequest, TokenPair};

/// Account endpoints. None of them go through credential renewal.
#[derive(Clone)]
pub struct AuthApi {
    client: SessionClient,
}

impl AuthApi {
    pub fn new(client: SessionClient) -> Self {
        Self { client }
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        if request.password != request.password2 {
            return Err(ApiError::Validation(FieldErrors::single(
                "password2",
                "Passwords do not match",
            )));
        }

        self.client
            .send_anonymous(ApiRequest::post("auth/register/").json(request)?)
            .await?;
        tracing::info!(username = %request.username, "Account registered");
        Ok(())
    }

    /// Exchange credentials for a token pair and store it in the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let tokens: TokenPair = self
            .client
            .send_anonymous_json(
                ApiRequest::post("auth/login/").json(&LoginRequest { username, password })?,
            )
            .await?;

        self.client
            .session()
            .establish(tokens.access, tokens.refresh)
            .await?;
        tracing::info!(username = %username, "Logged in");
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.client.session().clear(LogoutReason::UserRequested).await
    }
}
