use crate::models::{RequestContext, UserRole};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing {} header", name)))
}

/// Actor identity from the `X-User-ID` and `X-User-Role` headers set by the
/// upstream gateway.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id: Uuid = header(parts, USER_ID_HEADER)?.parse().map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", USER_ID_HEADER))
        })?;
        let role: UserRole = header(parts, USER_ROLE_HEADER)?
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| {
                AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", USER_ROLE_HEADER))
            })?;

        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        Ok(RequestContext::new(user_id, role))
    }
}

/// An actor with the ADMIN role. Anyone else gets 403.
#[derive(Debug, Clone, Copy)]
pub struct Admin(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_request_parts(parts, state).await?;
        if !ctx.is_admin() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This operation requires the ADMIN role"
            )));
        }
        Ok(Admin(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    async fn extract<T: FromRequestParts<(), Rejection = AppError>>(
        headers: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        T::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_user_and_role() {
        let id = Uuid::new_v4();
        let raw = id.to_string();
        let ctx: RequestContext =
            extract(&[(USER_ID_HEADER, raw.as_str()), (USER_ROLE_HEADER, "employee")])
                .await
                .unwrap();
        assert_eq!(ctx, RequestContext::new(id, UserRole::Employee));
    }

    #[tokio::test]
    async fn missing_or_bad_headers_are_unauthorized() {
        let err = extract::<RequestContext>(&[(USER_ROLE_HEADER, "ADMIN")])
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let err = extract::<RequestContext>(&[(USER_ID_HEADER, "42"), (USER_ROLE_HEADER, "ADMIN")])
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn employees_are_not_admins() {
        let raw = Uuid::new_v4().to_string();
        let id = raw.as_str();
        let err = extract::<Admin>(&[(USER_ID_HEADER, id), (USER_ROLE_HEADER, "EMPLOYEE")])
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);

        let admin: Admin = extract(&[(USER_ID_HEADER, id), (USER_ROLE_HEADER, "ADMIN")])
            .await
            .unwrap();
        assert!(admin.0.is_admin());
    }
}
