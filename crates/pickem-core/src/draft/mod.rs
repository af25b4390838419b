// Pick submission, pick-window locking, and draft turn order.

pub mod lock;
pub mod order;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DraftConfig;
use crate::model::{GameId, LeagueId, LeagueMembership, Pick, PickTarget, PlayerId, UserId};
use crate::store::{NewPick, Store, UpsertOutcome};

pub use lock::{LockReason, LockState, PickWindow};
pub use order::DraftOrder;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PickError {
    #[error("invalid pick request: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("picks are locked: {reason}")]
    AlreadyLocked { reason: LockReason },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("user {user} is out of turn; next to pick is {next}")]
    OutOfTurn { user: UserId, next: UserId },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Raw pick request as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PickRequest {
    pub pick_type: String,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
}

/// A validated pick request: exactly one of team or player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSelection {
    Player(PlayerId),
    Team,
}

impl TryFrom<&PickRequest> for PickSelection {
    type Error = PickError;

    fn try_from(req: &PickRequest) -> Result<Self, Self::Error> {
        match (req.pick_type.as_str(), req.player_id) {
            ("player", Some(id)) => Ok(PickSelection::Player(id)),
            ("player", None) => Err(PickError::Validation(
                "player pick requires a player_id".into(),
            )),
            ("team", None) => Ok(PickSelection::Team),
            ("team", Some(_)) => Err(PickError::Validation(
                "team pick must not name a player".into(),
            )),
            (other, _) => Err(PickError::Validation(format!(
                "pick_type must be \"player\" or \"team\", got {other:?}"
            ))),
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub pick: Pick,
    /// `Updated` when the (user, league, game) row already existed.
    pub outcome: UpsertOutcome,
    /// True when this submission completed the league and locked the game.
    pub locked_now: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Entry point for pick submission and draft-order management.
pub struct PickService {
    store: Arc<dyn Store>,
    rules: DraftConfig,
}

impl PickService {
    pub fn new(store: Arc<dyn Store>, rules: DraftConfig) -> Self {
        PickService { store, rules }
    }

    /// Create or replace `user`'s pick for `game` in `league`, acting as `actor`.
    ///
    /// Members may only pick for themselves while the window is open. Admins
    /// may pick for anyone, including after the lock, but never once the game
    /// has been settled.
    pub async fn submit_pick(
        &self,
        actor: UserId,
        user: UserId,
        league: LeagueId,
        game_id: GameId,
        request: &PickRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, PickError> {
        let selection = PickSelection::try_from(request)?;

        let actor_membership = self.store.membership(league, actor).await?.ok_or_else(|| {
            PickError::Unauthorized(format!("user {actor} is not a member of league {league}"))
        })?;
        let is_admin = actor_membership.is_admin();
        if actor != user && !is_admin {
            return Err(PickError::Unauthorized(format!(
                "user {actor} may not pick for user {user}"
            )));
        }
        if actor != user && self.store.membership(league, user).await?.is_none() {
            return Err(PickError::Validation(format!(
                "user {user} is not a member of league {league}"
            )));
        }

        let game = self
            .store
            .game(game_id)
            .await?
            .ok_or_else(|| PickError::Validation(format!("game {game_id} does not exist")))?;

        let members = self.store.memberships(league).await?;
        let picks = self.store.picks_for_league_game(league, game_id).await?;
        let window = PickWindow::evaluate(&game, &picks, members.len(), now);

        match window.state {
            LockState::Open => {}
            LockState::Settled => {
                return Err(PickError::AlreadyLocked {
                    reason: LockReason::Settled,
                })
            }
            LockState::Locked(reason) if !is_admin => {
                return Err(PickError::AlreadyLocked { reason });
            }
            LockState::Locked(reason) => {
                debug!(actor, user, league, game_id, %reason, "admin override of locked pick window");
            }
        }

        let target = self.resolve_target(selection).await?;
        let existing = picks.iter().find(|p| p.user_id == user);

        if self.rules.exclusive_player_picks {
            if let Some(player_id) = target.player_id() {
                if picks
                    .iter()
                    .any(|p| p.user_id != user && p.target.player_id() == Some(player_id))
                {
                    return Err(PickError::InvalidSelection(format!(
                        "{target} has already been picked in this league"
                    )));
                }
            }
        }

        if self.rules.enforce_turn_order && !is_admin && existing.is_none() {
            let order = DraftOrder::from_memberships(&members);
            let picked: HashSet<UserId> = picks.iter().map(|p| p.user_id).collect();
            if let Some(next) = order.next_to_pick(&picked) {
                if next != user {
                    return Err(PickError::OutOfTurn { user, next });
                }
            }
        }

        let new_pick = NewPick {
            user_id: user,
            league_id: league,
            game_id,
            target,
            // An admin filling a pick into a locked window still stamps it.
            locked_at: (!window.state.is_open()).then_some(now),
            at: now,
        };
        let (mut pick, outcome) = self.store.upsert_pick(&new_pick).await?;
        if outcome == UpsertOutcome::Updated {
            debug!(pick_id = pick.id, "pick already existed, updated instead");
        }
        info!(
            pick_id = pick.id,
            actor,
            user,
            league,
            game_id,
            selection = %pick.target,
            ?outcome,
            "pick submitted"
        );

        let mut locked_now = false;
        if window.state.is_open() {
            let picked_after = picks.len() + usize::from(outcome == UpsertOutcome::Created);
            if !members.is_empty() && picked_after >= members.len() {
                let locked = self.store.lock_picks(game_id, Some(league), now).await?;
                info!(league, game_id, locked, "all members picked, picks locked");
                locked_now = true;
                if let Some(stamped) = self.store.pick(pick.id).await? {
                    pick = stamped;
                }
            }
        }

        Ok(SubmitOutcome {
            pick,
            outcome,
            locked_now,
        })
    }

    /// Current window state for UI messages.
    pub async fn pick_window(
        &self,
        league: LeagueId,
        game_id: GameId,
        now: DateTime<Utc>,
    ) -> Result<PickWindow, PickError> {
        let game = self
            .store
            .game(game_id)
            .await?
            .ok_or_else(|| PickError::Validation(format!("game {game_id} does not exist")))?;
        let members = self.store.memberships(league).await?;
        let picks = self.store.picks_for_league_game(league, game_id).await?;
        Ok(PickWindow::evaluate(&game, &picks, members.len(), now))
    }

    pub async fn draft_order(&self, league: LeagueId) -> Result<DraftOrder, PickError> {
        let members = self.store.memberships(league).await?;
        Ok(DraftOrder::from_memberships(&members))
    }

    /// Earliest member in the draft order without a pick for `game_id`.
    pub async fn next_to_pick(
        &self,
        league: LeagueId,
        game_id: GameId,
    ) -> Result<Option<UserId>, PickError> {
        let order = self.draft_order(league).await?;
        let picks = self.store.picks_for_league_game(league, game_id).await?;
        let picked: HashSet<UserId> = picks.iter().map(|p| p.user_id).collect();
        Ok(order.next_to_pick(&picked))
    }

    /// Assign positions 1..n in the given order. An empty list clears it.
    pub async fn set_draft_order(
        &self,
        league: LeagueId,
        users: &[UserId],
    ) -> Result<DraftOrder, PickError> {
        let members = self.store.memberships(league).await?;
        let mut seen = HashSet::new();
        for user in users {
            if !seen.insert(*user) {
                return Err(PickError::Validation(format!(
                    "user {user} appears twice in the draft order"
                )));
            }
            if !members.iter().any(|m| m.user_id == *user) {
                return Err(PickError::Validation(format!(
                    "user {user} is not a member of league {league}"
                )));
            }
        }
        let order = if users.is_empty() {
            DraftOrder::Unset
        } else {
            DraftOrder::Ordered(users.to_vec())
        };
        self.store
            .set_draft_positions(league, &order.assignments(&members))
            .await?;
        info!(league, order = ?order.users(), "draft order set");
        Ok(order)
    }

    /// Move the member in position 1 to last; everyone else moves up one.
    pub async fn rotate_draft_order(&self, league: LeagueId) -> Result<DraftOrder, PickError> {
        let members = self.store.memberships(league).await?;
        let rotated = rotated_order(&members).ok_or_else(|| {
            PickError::Validation(format!("league {league} has no draft order to rotate"))
        })?;
        self.store
            .set_draft_positions(league, &rotated.assignments(&members))
            .await?;
        info!(league, order = ?rotated.users(), "draft order rotated");
        Ok(rotated)
    }

    async fn resolve_target(&self, selection: PickSelection) -> Result<PickTarget, PickError> {
        match selection {
            PickSelection::Team => Ok(PickTarget::Team),
            PickSelection::Player(player_id) => {
                let player = self.store.player(player_id).await?.ok_or_else(|| {
                    PickError::InvalidSelection(format!("player {player_id} does not exist"))
                })?;
                if !player.active {
                    return Err(PickError::InvalidSelection(format!(
                        "{} is not on the active roster",
                        player.name
                    )));
                }
                Ok(PickTarget::Player {
                    player_id,
                    player_name: player.name,
                })
            }
        }
    }
}

fn rotated_order(members: &[LeagueMembership]) -> Option<DraftOrder> {
    let order = DraftOrder::from_memberships(members);
    order.is_set().then(|| order.rotated())
}
