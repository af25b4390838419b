// NHL web API client implementing the game-data source.
//
// Box scores come from `/gamecenter/{id}/boxscore`; the per-goal scoring
// summary lives on `/gamecenter/{id}/landing` and is merged in when present.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use pickem_core::config::NhlConfig;
use pickem_core::model::GameStatus;
use pickem_core::normalize::RawBoxScore;
use pickem_core::source::{GameDataSource, SourceError, UpstreamGameState};

const USER_AGENT: &str = concat!("pickem/", env!("CARGO_PKG_VERSION"));

/// Low-level client for the public NHL web API.
pub struct NhlWebClient {
    http: reqwest::Client,
    base_url: String,
}

impl NhlWebClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &NhlConfig) -> anyhow::Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    async fn get_json(&self, game_ref: i64, path: &str) -> Result<Value, SourceError> {
        let url = format!("{}/gamecenter/{game_ref}/{path}", self.base_url);
        debug!(%url, "fetching");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(game_ref)),
            status if !status.is_success() => Err(SourceError::Unavailable(format!(
                "GET {url} returned {status}"
            ))),
            _ => response
                .json::<Value>()
                .await
                .map_err(|e| SourceError::Decode(format!("GET {url}: {e}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameStateView {
    game_state: String,
    #[serde(default)]
    home_team: ScoreView,
    #[serde(default)]
    away_team: ScoreView,
}

#[derive(Debug, Default, Deserialize)]
struct ScoreView {
    #[serde(default)]
    score: Option<u32>,
}

#[async_trait]
impl GameDataSource for NhlWebClient {
    async fn fetch_box_score(&self, game_ref: i64) -> Result<RawBoxScore, SourceError> {
        let mut boxscore = self.get_json(game_ref, "boxscore").await?;

        if boxscore.get("summary").is_none() {
            // Without the summary the normalizer falls back to box-score totals.
            match self.get_json(game_ref, "landing").await {
                Ok(landing) => {
                    if let (Some(summary), Some(obj)) =
                        (landing.get("summary"), boxscore.as_object_mut())
                    {
                        obj.insert("summary".into(), summary.clone());
                    }
                }
                Err(e) => warn!(game_ref, error = %e, "landing fetch failed, no scoring summary"),
            }
        }

        RawBoxScore::from_json(boxscore)
            .map_err(|e| SourceError::Decode(format!("box score for {game_ref}: {e}")))
    }

    async fn fetch_game_state(&self, game_ref: i64) -> Result<UpstreamGameState, SourceError> {
        let value = self.get_json(game_ref, "boxscore").await?;
        let view: GameStateView = serde_json::from_value(value)
            .map_err(|e| SourceError::Decode(format!("game state for {game_ref}: {e}")))?;
        let status = GameStatus::from_upstream(&view.game_state).ok_or_else(|| {
            SourceError::Decode(format!("unknown game state {:?}", view.game_state))
        })?;
        Ok(UpstreamGameState {
            status,
            home_score: view.home_team.score,
            away_score: view.away_team.score,
        })
    }
}
