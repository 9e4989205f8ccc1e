use super::Middleware;
use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Rejects requests whose header does not carry the expected token with `401`
pub struct HeaderTokenMiddleware {
    header: String,
    expected: String,
}

impl HeaderTokenMiddleware {
    /// Require `header` to equal `token` exactly
    pub fn new(header: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            expected: token.into(),
        }
    }

    /// Require `Authorization: Bearer <token>`
    pub fn bearer(token: &str) -> Self {
        Self::new("authorization", format!("Bearer {token}"))
    }
}

impl Middleware for HeaderTokenMiddleware {
    fn before(&self, req: &HandlerRequest) -> Option<HandlerResponse> {
        match req.header(&self.header) {
            Some(value) if value == self.expected => None,
            _ => {
                tracing::debug!(
                    request_id = %req.request_id,
                    header = %self.header,
                    "Missing or invalid token"
                );
                Some(HandlerResponse::error(401, "Unauthorized"))
            }
        }
    }
}
