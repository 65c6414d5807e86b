//! REST adapter for the progress store and exercise source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lms_core::model::{CurriculumVersion, Exercise, ExerciseId, ProgressRecord, UserId};

use crate::error::TransportError;
use crate::remote::{ExerciseSource, ProgressStore};

#[derive(Clone, Debug)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    /// Build a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET` returning `None` on 404 and an error on any other non-2xx status.
    async fn get_optional(&self, path: &str) -> Result<Option<Response>, TransportError> {
        let response = self.client.get(self.url(path)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(path, "resource not found");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response)),
            status => Err(TransportError::Status(status)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExerciseList {
    exercises: Vec<Exercise>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveProgressRequest<'a> {
    user_id: &'a UserId,
    #[serde(flatten)]
    record: &'a ProgressRecord,
}

#[derive(Debug, Deserialize)]
struct SaveProgressResponse {
    success: bool,
}

#[async_trait]
impl ProgressStore for HttpApi {
    async fn fetch_progress(&self, user: &UserId) -> Result<Option<ProgressRecord>, TransportError> {
        let Some(response) = self.get_optional(&format!("/api/progress/{user}")).await? else {
            return Ok(None);
        };
        Ok(Some(response.json().await?))
    }

    async fn save_progress(&self, user: &UserId, record: &ProgressRecord) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url("/api/progress"))
            .json(&SaveProgressRequest { user_id: user, record })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }
        let ack: SaveProgressResponse = response.json().await?;
        if ack.success {
            Ok(())
        } else {
            Err(TransportError::Rejected)
        }
    }
}

#[async_trait]
impl ExerciseSource for HttpApi {
    async fn fetch_exercises(
        &self,
        version: CurriculumVersion,
    ) -> Result<Option<Vec<Exercise>>, TransportError> {
        let Some(response) = self.get_optional(&format!("/api/exercises/{version}")).await? else {
            return Ok(None);
        };
        let list: ExerciseList = response.json().await?;
        Ok(Some(list.exercises))
    }

    async fn fetch_exercise(
        &self,
        version: CurriculumVersion,
        id: &ExerciseId,
    ) -> Result<Option<Exercise>, TransportError> {
        let Some(response) = self.get_optional(&format!("/api/exercise/{version}/{id}")).await? else {
            return Ok(None);
        };
        Ok(Some(response.json().await?))
    }
}
