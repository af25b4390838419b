// Draft turn order for a league.

use std::collections::HashSet;

use crate::model::{LeagueMembership, UserId};

/// Turn order of a league, first pick first.
///
/// Only members holding a draft position take part; members without one are
/// never "next to pick".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DraftOrder {
    #[default]
    Unset,
    Ordered(Vec<UserId>),
}

impl DraftOrder {
    /// Build the order from stored positions. Ties keep user-id order.
    pub fn from_memberships(members: &[LeagueMembership]) -> Self {
        let mut positioned: Vec<(u32, UserId)> = members
            .iter()
            .filter_map(|m| m.draft_position.map(|p| (p, m.user_id)))
            .collect();
        if positioned.is_empty() {
            return DraftOrder::Unset;
        }
        positioned.sort();
        DraftOrder::Ordered(positioned.into_iter().map(|(_, user)| user).collect())
    }

    pub fn users(&self) -> &[UserId] {
        match self {
            DraftOrder::Unset => &[],
            DraftOrder::Ordered(users) => users,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, DraftOrder::Ordered(_))
    }

    /// 1-based position of `user`, if ordered.
    pub fn position_of(&self, user: UserId) -> Option<u32> {
        self.users()
            .iter()
            .position(|u| *u == user)
            .map(|i| i as u32 + 1)
    }

    /// Earliest member in the order who has not picked yet.
    pub fn next_to_pick(&self, already_picked: &HashSet<UserId>) -> Option<UserId> {
        self.users()
            .iter()
            .copied()
            .find(|user| !already_picked.contains(user))
    }

    /// The member in position 1 moves to last; everyone else moves up one.
    pub fn rotated(&self) -> DraftOrder {
        match self {
            DraftOrder::Unset => DraftOrder::Unset,
            DraftOrder::Ordered(users) => {
                let mut users = users.clone();
                if !users.is_empty() {
                    users.rotate_left(1);
                }
                DraftOrder::Ordered(users)
            }
        }
    }

    /// Position assignment for every member of the league. Members outside
    /// the order get `None`.
    pub fn assignments(&self, members: &[LeagueMembership]) -> Vec<(UserId, Option<u32>)> {
        members
            .iter()
            .map(|m| (m.user_id, self.position_of(m.user_id)))
            .collect()
    }
}
