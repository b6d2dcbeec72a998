//! Authenticated user context.
//!
//! The gateway in front of this service authenticates the buyer and forwards
//! their identity in `X-User-*` headers. Missing or malformed identity is
//! rejected with 401.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::BuyerProfile;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_PHONE_HEADER: &str = "x-user-phone";

#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl UserContext {
    pub fn buyer(&self) -> BuyerProfile {
        BuyerProfile {
            user_id: self.user_id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid X-User-ID header")))?;

        let context = UserContext {
            user_id,
            name: header(parts, USER_NAME_HEADER).unwrap_or_default().to_string(),
            email: header(parts, USER_EMAIL_HEADER).unwrap_or_default().to_string(),
            phone: header(parts, USER_PHONE_HEADER).unwrap_or_default().to_string(),
        };

        tracing::Span::current().record("user_id", user_id.to_string().as_str());

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<UserContext, AppError> {
        let (mut parts, _) = request.into_parts();
        UserContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_headers() {
        let user_id = Uuid::new_v4();
        let request = Request::builder()
            .header(USER_ID_HEADER, user_id.to_string())
            .header(USER_NAME_HEADER, "Ayu")
            .header(USER_EMAIL_HEADER, "ayu@example.com")
            .header(USER_PHONE_HEADER, "+628123456789")
            .body(())
            .unwrap();

        let context = extract(request).await.unwrap();
        assert_eq!(context.user_id, user_id);
        assert_eq!(context.buyer().email, "ayu@example.com");
    }

    #[tokio::test]
    async fn missing_user_id_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn malformed_user_id_is_unauthorized() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "42")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}
