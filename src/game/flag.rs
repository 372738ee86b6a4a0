//! Flag lifecycle
//!
//! ```text
//! AtHome --pickup(enemy)--> Carried --drop--> Dropped --pickup(any)--> Carried
//!    ^                         |                  |
//!    +--------return-----------+----return/expiry-+
//! ```
//!
//! The carrier lives inside `FlagState::Carried`, so "carrier present iff
//! carried" holds by construction. The auto-return deadline lives inside
//! `FlagState::Dropped` and disappears with that state: picking a dropped flag
//! up cancels the timer rather than leaving it to fire later.

use serde::{Deserialize, Serialize};

use crate::command::{CommandRejection, InvalidReason};
use crate::game::authority::{AuthorityToken, EntityKind};
use crate::game::constants::tick;
use crate::game::events::{FlagStatus, Notification};
use crate::game::state::PlayerId;
use crate::game::team::Team;
use crate::game::timer::Timer;
use crate::util::vec3::Vec3;

/// Movement below this distance is not replicated
const POSITION_EPSILON: f32 = 0.05;

/// Flag lifecycle state with its payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FlagState {
    AtHome,
    Carried { carrier: PlayerId },
    Dropped { at: Vec3, auto_return: Timer },
}

impl FlagState {
    pub fn status(&self) -> FlagStatus {
        match self {
            FlagState::AtHome => FlagStatus::AtHome,
            FlagState::Carried { .. } => FlagStatus::Carried,
            FlagState::Dropped { .. } => FlagStatus::Dropped,
        }
    }
}

/// A team's capturable flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    owner: Team,
    home: Vec3,
    position: Vec3,
    state: FlagState,
}

/// Why a flag went back to its base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCause {
    /// Auto-return timer expired
    Expired,
    /// A player of the owning team returned it
    Returned,
    /// Administrative or rule reset
    Forced,
}

impl Flag {
    /// Spawn a flag at its base
    pub fn new(owner: Team, home: Vec3) -> Self {
        Self {
            owner,
            home,
            position: home,
            state: FlagState::AtHome,
        }
    }

    pub fn owner(&self) -> Team {
        self.owner
    }

    pub fn home(&self) -> Vec3 {
        self.home
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn state(&self) -> &FlagState {
        &self.state
    }

    pub fn status(&self) -> FlagStatus {
        self.state.status()
    }

    pub fn carrier(&self) -> Option<PlayerId> {
        match self.state {
            FlagState::Carried { carrier } => Some(carrier),
            _ => None,
        }
    }

    /// Ticks until auto-return, when dropped
    pub fn auto_return_remaining(&self, now: u64) -> Option<u64> {
        match &self.state {
            FlagState::Dropped { auto_return, .. } => auto_return.remaining(now),
            _ => None,
        }
    }

    /// Pick the flag up.
    ///
    /// At home only the opposing team may take it; a dropped flag may be taken by
    /// anyone. Replacing the `Dropped` state discards its auto-return timer.
    pub fn pickup(
        &mut self,
        token: &AuthorityToken,
        player: PlayerId,
        player_team: Team,
        carrier_position: Vec3,
        carry_height: f32,
    ) -> Result<Notification, CommandRejection> {
        token.require(EntityKind::Flag)?;

        let message = match self.state {
            FlagState::AtHome if player_team == self.owner => {
                return Err(InvalidReason::SameTeamAtHome.into());
            }
            FlagState::AtHome => format!(
                "{} team has taken the {} flag!",
                player_team.display_name(),
                self.owner.display_name()
            ),
            FlagState::Dropped { .. } if player_team == self.owner => format!(
                "{} team recovered their flag!",
                self.owner.display_name()
            ),
            FlagState::Dropped { .. } => format!(
                "{} team picked up the {} flag!",
                player_team.display_name(),
                self.owner.display_name()
            ),
            FlagState::Carried { .. } => return Err(InvalidReason::FlagAlreadyCarried.into()),
        };

        self.state = FlagState::Carried { carrier: player };
        self.position = carrier_position + Vec3::UP * carry_height;

        tracing::info!("Flag {} picked up by {} ({})", self.owner, player, player_team);
        Ok(self.state_notification(message))
    }

    /// Drop the flag where it is and arm the auto-return timer
    pub fn drop(
        &mut self,
        token: &AuthorityToken,
        now: u64,
        auto_return_ticks: u64,
    ) -> Result<Notification, CommandRejection> {
        token.require(EntityKind::Flag)?;

        let carrier = self.carrier().ok_or(InvalidReason::FlagNotCarried)?;

        // Land on the ground under the carrier
        let at = Vec3::new(self.position.x, self.home.y, self.position.z);
        self.position = at;
        self.state = FlagState::Dropped {
            at,
            auto_return: Timer::armed(now, auto_return_ticks),
        };

        tracing::info!(
            "Flag {} dropped by {} at ({:.1}, {:.1}, {:.1}), auto-return in {:.1}s",
            self.owner,
            carrier,
            at.x,
            at.y,
            at.z,
            tick::to_secs(auto_return_ticks)
        );
        Ok(self.state_notification(format!("The {} flag was dropped!", self.owner.display_name())))
    }

    /// Send the flag back to its base from either `Carried` or `Dropped`
    pub fn return_home(
        &mut self,
        token: &AuthorityToken,
        cause: ReturnCause,
    ) -> Result<Notification, CommandRejection> {
        token.require(EntityKind::Flag)?;

        if self.state == FlagState::AtHome {
            return Err(InvalidReason::FlagAtHome.into());
        }

        self.state = FlagState::AtHome;
        self.position = self.home;

        tracing::info!("Flag {} returned home ({:?})", self.owner, cause);
        Ok(self.state_notification(format!(
            "The {} flag has returned to base!",
            self.owner.display_name()
        )))
    }

    /// Fire the auto-return if it is due. A flag no longer in `Dropped` has no
    /// timer, so a stale expiry is impossible to act on.
    pub fn check_auto_return(&mut self, token: &AuthorityToken, now: u64) -> Option<Notification> {
        match self.state {
            FlagState::Dropped { auto_return, .. } if auto_return.expired(now) => {
                self.return_home(token, ReturnCause::Expired).ok()
            }
            _ => None,
        }
    }

    /// Follow the carrier. Returns a movement update when the flag moved
    /// noticeably.
    pub fn follow_carrier(
        &mut self,
        token: &AuthorityToken,
        carrier_position: Vec3,
        carry_height: f32,
    ) -> Option<Notification> {
        if !token.covers(EntityKind::Flag) || !matches!(self.state, FlagState::Carried { .. }) {
            return None;
        }

        let target = carrier_position + Vec3::UP * carry_height;
        if target.distance_to(self.position) < POSITION_EPSILON {
            return None;
        }
        self.position = target;
        Some(Notification::FlagMoved {
            flag: self.owner,
            position: target,
        })
    }

    fn state_notification(&self, message: String) -> Notification {
        Notification::FlagStateChanged {
            flag: self.owner,
            state: self.status(),
            carrier: self.carrier(),
            position: self.position,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::{AuthorityResolver, EntityRef};
    use uuid::Uuid;

    const HEIGHT: f32 = 2.0;

    fn flag() -> Flag {
        Flag::new(Team::TeamA, Vec3::ground(-40.0, 0.0))
    }

    fn assert_carrier_invariant(flag: &Flag) {
        assert_eq!(flag.status() == FlagStatus::Carried, flag.carrier().is_some());
    }

    #[test]
    fn test_new_flag_at_home() {
        let flag = flag();
        assert_eq!(flag.status(), FlagStatus::AtHome);
        assert_eq!(flag.position(), flag.home());
        assert_carrier_invariant(&flag);
    }

    #[test]
    fn test_same_team_at_home_rejected() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        let result = flag.pickup(&token, Uuid::new_v4(), Team::TeamA, Vec3::ZERO, HEIGHT);
        assert_eq!(result, Err(InvalidReason::SameTeamAtHome.into()));
        assert_eq!(flag.status(), FlagStatus::AtHome);
        assert_carrier_invariant(&flag);
    }

    #[test]
    fn test_enemy_pickup_binds_carrier() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();
        let player = Uuid::new_v4();
        let at = Vec3::ground(-40.0, 1.0);

        let notification = flag.pickup(&token, player, Team::TeamB, at, HEIGHT).unwrap();

        assert_eq!(flag.carrier(), Some(player));
        assert_eq!(flag.position(), at + Vec3::UP * HEIGHT);
        assert_carrier_invariant(&flag);
        match notification {
            Notification::FlagStateChanged { state, carrier, message, .. } => {
                assert_eq!(state, FlagStatus::Carried);
                assert_eq!(carrier, Some(player));
                assert!(message.contains("Red team has taken the Blue flag"));
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_carried_flag_cannot_be_picked_again() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();
        let first = Uuid::new_v4();

        flag.pickup(&token, first, Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        let second = flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT);

        assert_eq!(second, Err(InvalidReason::FlagAlreadyCarried.into()));
        assert_eq!(flag.carrier(), Some(first));
    }

    #[test]
    fn test_drop_arms_timer_and_lands() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ground(5.0, 5.0), HEIGHT)
            .unwrap();
        flag.drop(&token, 100, 450).unwrap();

        assert_eq!(flag.status(), FlagStatus::Dropped);
        assert_eq!(flag.carrier(), None);
        assert_eq!(flag.position(), Vec3::ground(5.0, 5.0));
        assert_eq!(flag.auto_return_remaining(100), Some(450));
        assert_carrier_invariant(&flag);
    }

    #[test]
    fn test_drop_when_not_carried() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();
        assert_eq!(flag.drop(&token, 0, 10), Err(InvalidReason::FlagNotCarried.into()));
    }

    #[test]
    fn test_auto_return_expiry() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ground(5.0, 5.0), HEIGHT)
            .unwrap();
        flag.drop(&token, 0, 450).unwrap();

        assert!(flag.check_auto_return(&token, 449).is_none());
        let returned = flag.check_auto_return(&token, 450);
        assert!(returned.is_some());
        assert_eq!(flag.status(), FlagStatus::AtHome);
        assert_eq!(flag.position(), flag.home());
    }

    #[test]
    fn test_repickup_cancels_auto_return() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();
        let auto_return = tick::from_secs(15.0);

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        flag.drop(&token, 0, auto_return).unwrap();

        let repick_at = tick::from_secs(14.9);
        for now in 0..repick_at {
            assert!(flag.check_auto_return(&token, now).is_none());
        }
        let repicker = Uuid::new_v4();
        flag.pickup(&token, repicker, Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();

        // Still carried at 30s: the timer went away with the Dropped state
        for now in repick_at..=tick::from_secs(30.0) {
            assert!(flag.check_auto_return(&token, now).is_none());
        }
        assert_eq!(flag.carrier(), Some(repicker));
    }

    #[test]
    fn test_own_team_recovers_dropped_flag() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        flag.drop(&token, 0, 10).unwrap();

        let defender = Uuid::new_v4();
        let notification = flag.pickup(&token, defender, Team::TeamA, Vec3::ZERO, HEIGHT).unwrap();
        assert_eq!(flag.carrier(), Some(defender));
        assert!(notification.message().unwrap().contains("recovered"));
    }

    #[test]
    fn test_return_from_carried_and_at_home() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        assert_eq!(
            flag.return_home(&token, ReturnCause::Returned),
            Err(InvalidReason::FlagAtHome.into())
        );

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        flag.return_home(&token, ReturnCause::Forced).unwrap();
        assert_eq!(flag.status(), FlagStatus::AtHome);
        assert_eq!(flag.carrier(), None);
        assert_eq!(flag.position(), flag.home());
    }

    #[test]
    fn test_narrow_token_cannot_move_flag() {
        let resolver = AuthorityResolver::local_authority(Uuid::new_v4());
        let ledger_only = resolver.claim(&EntityRef::TeamLedger(Team::TeamA)).unwrap();
        let mut flag = flag();

        let result = flag.pickup(&ledger_only, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT);
        assert!(matches!(result, Err(CommandRejection::AuthorityViolation(_))));
        assert_eq!(flag.status(), FlagStatus::AtHome);

        let token = AuthorityToken::for_tests();
        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        assert!(flag.follow_carrier(&ledger_only, Vec3::ground(9.0, 0.0), HEIGHT).is_none());
        assert!(flag.drop(&ledger_only, 0, 10).is_err());
        assert_eq!(flag.status(), FlagStatus::Carried);
    }

    #[test]
    fn test_follow_carrier() {
        let token = AuthorityToken::for_tests();
        let mut flag = flag();

        assert!(flag.follow_carrier(&token, Vec3::ZERO, HEIGHT).is_none());

        flag.pickup(&token, Uuid::new_v4(), Team::TeamB, Vec3::ZERO, HEIGHT).unwrap();
        // No movement, no update
        assert!(flag.follow_carrier(&token, Vec3::ZERO, HEIGHT).is_none());

        let moved = flag.follow_carrier(&token, Vec3::ground(3.0, 0.0), HEIGHT);
        assert_eq!(
            moved,
            Some(Notification::FlagMoved {
                flag: Team::TeamA,
                position: Vec3::new(3.0, HEIGHT, 0.0),
            })
        );
    }
}
