//! Fixed client allow-list for the command API

use std::collections::HashSet;

use axum::http::HeaderMap;

use crate::error::AppError;

/// Header carrying the caller's client id
pub const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: HashSet<i64>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Return the caller's id if it is on the list
    pub fn authorize(&self, headers: &HeaderMap) -> Result<i64, AppError> {
        let id = headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok());

        match id {
            Some(id) if self.ids.contains(&id) => Ok(id),
            _ => {
                tracing::warn!("Unauthorized access denied for client id: {:?}", id);
                Err(AppError::Unauthorized)
            }
        }
    }
}
