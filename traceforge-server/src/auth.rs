// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! API-key to project-id extraction. The mapping itself lives in
//! [`crate::config::AuthConfig`]; this is just the boundary that turns a
//! request's `Authorization` header into a [`AuthContext`] or a 401.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub project_id: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !state.config.auth.enabled {
            return Ok(AuthContext {
                project_id: "default".to_string(),
            });
        }

        let api_key = bearer_token(parts).ok_or_else(|| ApiError::Unauthorized("missing api key".to_string()))?;

        state
            .config
            .auth
            .api_keys
            .get(api_key)
            .map(|project_id| AuthContext {
                project_id: project_id.clone(),
            })
            .ok_or_else(|| ApiError::Unauthorized("unknown api key".to_string()))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn parts_with_auth(header: Option<&str>) -> Parts {
        let mut req = Request::builder().uri("/");
        if let Some(h) = header {
            req = req.header(axum::http::header::AUTHORIZATION, HeaderValue::from_str(h).unwrap());
        }
        req.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_strips_prefix() {
        let parts = parts_with_auth(Some("Bearer sk-live-abc"));
        assert_eq!(bearer_token(&parts), Some("sk-live-abc"));
    }

    #[test]
    fn bearer_token_is_none_without_header() {
        let parts = parts_with_auth(None);
        assert_eq!(bearer_token(&parts), None);
    }
}
