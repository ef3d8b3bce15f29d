use crate::auth::{
    AuthError, AuthService, ErrorBody,
    api_tokens::{ApiTokenSummary, GeneratedApiToken},
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Deserialize, Default, ToSchema)]
pub struct GenerateApiTokenBody {
    /// Role ids or names; defaults to every role of the caller.
    pub roles: Option<Vec<String>>,
    /// Unix seconds; omitted for a token that never expires.
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub description: String,
}

#[utoipa::path(
    post,
    path = "/v1/api-tokens",
    request_body = GenerateApiTokenBody,
    responses(
        (status = 201, description = "Token created; the plaintext is only returned once", body = GeneratedApiToken),
        (status = 400, description = "Expiry in the past", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Requested roles exceed the caller's", body = ErrorBody)
    ),
    tag = "api-tokens"
)]
pub async fn generate_api_token(
    headers: HeaderMap,
    auth: Extension<AuthService>,
    payload: Option<Json<GenerateApiTokenBody>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = auth.authenticate_headers(&headers).await?;
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let generated = auth
        .generate_api_token(&principal, body.roles, body.expires_at, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(generated)))
}

#[utoipa::path(
    get,
    path = "/v1/api-tokens",
    responses(
        (status = 200, description = "Tokens owned by the caller", body = [ApiTokenSummary]),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "api-tokens"
)]
pub async fn list_api_tokens(
    headers: HeaderMap,
    auth: Extension<AuthService>,
) -> Result<Json<Vec<ApiTokenSummary>>, AuthError> {
    let principal = auth.authenticate_headers(&headers).await?;
    Ok(Json(auth.list_api_tokens(&principal).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/api-tokens/{id}",
    params(("id" = String, Path, description = "Token id")),
    responses(
        (status = 204, description = "Token removed"),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 404, description = "No such token for the caller", body = ErrorBody)
    ),
    tag = "api-tokens"
)]
pub async fn remove_api_token(
    headers: HeaderMap,
    auth: Extension<AuthService>,
    Path(id): Path<String>,
) -> Result<StatusCode, AuthError> {
    let principal = auth.authenticate_headers(&headers).await?;
    auth.remove_api_token(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::auth::test_support::{Fixture, PASSWORD};
    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
        response::Response,
    };
    use tower::ServiceExt;

    fn app(fixture: &Fixture) -> Router {
        let (router, _) = crate::api::router().split_for_parts();
        router.layer(Extension(fixture.service.clone()))
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn generate_list_use_and_remove() {
        let fixture = Fixture::new().await;
        let app = app(&fixture);
        let session = fixture.password_login("alice", PASSWORD).await;
        let bearer = format!("Bearer {}", session.access_token.token);

        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/api-tokens")
                    .header(AUTHORIZATION, &bearer)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({"roles": ["viewer"], "description": "ci"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let generated = json(response).await;
        let token = generated["token"].as_str().expect("token").to_string();
        let id = generated["id"].as_str().expect("id").to_string();
        assert!(token.starts_with("it."));

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/api-tokens")
                    .header(AUTHORIZATION, &bearer)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let listed = json(response).await;
        assert_eq!(listed[0]["id"], id.as_str());
        assert_eq!(listed[0]["redacted"], &token[..6]);
        assert!(listed[0].get("token").is_none());

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/auth/introspect")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["login_kind"], "api");

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/v1/api-tokens/{id}"))
                    .header(AUTHORIZATION, &bearer)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::delete(format!("/v1/api-tokens/{id}"))
                    .header(AUTHORIZATION, &bearer)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn escalation_is_denied() {
        let fixture = Fixture::new().await;
        let session = fixture.password_login("carol", PASSWORD).await;
        let response = app(&fixture)
            .oneshot(
                Request::post("/v1/api-tokens")
                    .header(AUTHORIZATION, format!("Bearer {}", session.access_token.token))
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::json!({"roles": ["admin"]}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json(response).await["code"], "permission_denied");
    }
}
