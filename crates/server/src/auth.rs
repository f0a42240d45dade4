use std::collections::HashSet;

use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Accepts `Authorization: Bearer <token>` or, when configured, the raw
/// token in a custom header.
#[derive(Clone)]
pub(crate) struct AuthManager {
    tokens: HashSet<String>,
    header: Option<String>,
}

impl AuthManager {
    pub(crate) fn new(tokens: HashSet<String>, header: Option<String>) -> Self {
        Self { tokens, header }
    }

    pub(crate) fn validate(&self, headers: &HeaderMap) -> bool {
        if self.tokens.is_empty() {
            return true;
        }

        if let Some(token) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(strip_bearer)
        {
            if self.tokens.contains(token) {
                return true;
            }
        }

        self.header
            .as_deref()
            .and_then(|name| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(|token| self.tokens.contains(token.trim()))
            .unwrap_or(false)
    }
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim()
}
