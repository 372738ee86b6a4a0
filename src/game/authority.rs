//! Authority role resolution
//!
//! Exactly one host in a session may write any given shared entity. Rather than
//! checking an "am I authority" flag inside every mutator, the resolver hands out
//! an [`AuthorityToken`] that only the owning host can obtain. Every mutating
//! method on flags, ledgers and the world takes `&AuthorityToken`, so code on a
//! replica host has nothing to call them with.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::state::{CoinId, PlayerId};
use crate::game::team::Team;

/// Identifier of a simulation host (process) in the session
pub type HostId = Uuid;

/// Kinds of independently-owned shared entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Flag,
    TeamLedger,
    Custody,
    Coin,
    Roster,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Flag,
        EntityKind::TeamLedger,
        EntityKind::Custody,
        EntityKind::Coin,
        EntityKind::Roster,
    ];

    fn index(&self) -> usize {
        match self {
            EntityKind::Flag => 0,
            EntityKind::TeamLedger => 1,
            EntityKind::Custody => 2,
            EntityKind::Coin => 3,
            EntityKind::Roster => 4,
        }
    }

    fn bit(&self) -> u8 {
        1 << self.index()
    }
}

/// A specific shared entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// Flag owned by the given team
    Flag(Team),
    /// Score & buff record of a team
    TeamLedger(Team),
    /// Coin custody of a player
    Custody(PlayerId),
    /// A coin lying in the world
    Coin(CoinId),
    /// The player roster (spawns and leaves)
    Roster,
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Flag(_) => EntityKind::Flag,
            EntityRef::TeamLedger(_) => EntityKind::TeamLedger,
            EntityRef::Custody(_) => EntityKind::Custody,
            EntityRef::Coin(_) => EntityKind::Coin,
            EntityRef::Roster => EntityKind::Roster,
        }
    }
}

/// Mutation attempted on a host that does not own the entity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Host {local} is not the authority for {entity:?} (owner: {owner})")]
pub struct AuthorityViolation {
    pub local: HostId,
    pub owner: HostId,
    pub entity: EntityKind,
}

/// Proof that the holding host owns a set of entity kinds.
///
/// Cannot be constructed outside this module, is neither `Clone` nor
/// serializable, and is only issued by [`AuthorityResolver`]. Mutators check
/// the scope with [`AuthorityToken::require`] and refuse to touch anything the
/// token does not cover.
#[derive(Debug)]
pub struct AuthorityToken {
    host: HostId,
    scope: u8,
    /// Owner of every kind when the token was issued, indexed by kind
    owners: [HostId; 5],
}

impl AuthorityToken {
    /// Host this token was issued to
    pub fn host(&self) -> HostId {
        self.host
    }

    /// Whether this token covers the given entity kind
    pub fn covers(&self, kind: EntityKind) -> bool {
        self.scope & kind.bit() != 0
    }

    /// Fails when the token does not cover `kind`
    pub fn require(&self, kind: EntityKind) -> Result<(), AuthorityViolation> {
        if self.covers(kind) {
            return Ok(());
        }
        Err(AuthorityViolation {
            local: self.host,
            owner: self.owners[kind.index()],
            entity: kind,
        })
    }

    /// Fails on the first kind in `kinds` the token does not cover
    pub fn require_all(&self, kinds: &[EntityKind]) -> Result<(), AuthorityViolation> {
        kinds.iter().try_for_each(|kind| self.require(*kind))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let host = Uuid::new_v4();
        Self {
            host,
            scope: EntityKind::ALL.iter().fold(0, |acc, k| acc | k.bit()),
            owners: [host; 5],
        }
    }
}

/// Decides which host owns each shared entity
#[derive(Debug, Clone)]
pub struct AuthorityResolver {
    local: HostId,
    session_authority: HostId,
    /// Per-kind owners when entities are not co-located on the session authority
    overrides: HashMap<EntityKind, HostId>,
}

impl AuthorityResolver {
    /// Resolver for a session whose entities are all owned by `session_authority`
    pub fn new(local: HostId, session_authority: HostId) -> Self {
        Self {
            local,
            session_authority,
            overrides: HashMap::new(),
        }
    }

    /// Resolver for a host that owns everything (single-host or listen server)
    pub fn local_authority(local: HostId) -> Self {
        Self::new(local, local)
    }

    /// Assign a different owner to one entity kind
    pub fn with_owner(mut self, kind: EntityKind, owner: HostId) -> Self {
        self.overrides.insert(kind, owner);
        self
    }

    pub fn local_host(&self) -> HostId {
        self.local
    }

    fn owners(&self) -> [HostId; 5] {
        EntityKind::ALL.map(|kind| self.owner_of_kind(kind))
    }

    /// Host that owns entities of this kind
    pub fn owner_of_kind(&self, kind: EntityKind) -> HostId {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.session_authority)
    }

    /// Host that owns the entity
    pub fn owner_of(&self, entity: &EntityRef) -> HostId {
        self.owner_of_kind(entity.kind())
    }

    /// Whether the local host is the single writer for the entity
    pub fn is_authority_for(&self, entity: &EntityRef) -> bool {
        self.owner_of(entity) == self.local
    }

    /// Obtain a token scoped to one entity's kind
    pub fn claim(&self, entity: &EntityRef) -> Result<AuthorityToken, AuthorityViolation> {
        let kind = entity.kind();
        let owner = self.owner_of_kind(kind);
        if owner != self.local {
            return Err(AuthorityViolation {
                local: self.local,
                owner,
                entity: kind,
            });
        }
        Ok(AuthorityToken {
            host: self.local,
            scope: kind.bit(),
            owners: self.owners(),
        })
    }

    /// Obtain a token covering every entity kind.
    ///
    /// Fails on the first kind owned by another host.
    pub fn claim_all(&self) -> Result<AuthorityToken, AuthorityViolation> {
        let mut scope = 0u8;
        for kind in EntityKind::ALL {
            let owner = self.owner_of_kind(kind);
            if owner != self.local {
                return Err(AuthorityViolation {
                    local: self.local,
                    owner,
                    entity: kind,
                });
            }
            scope |= kind.bit();
        }
        Ok(AuthorityToken {
            host: self.local,
            scope,
            owners: self.owners(),
        })
    }
}

/// A value that is only reachable for writing together with its authority token
#[derive(Debug)]
pub struct Authoritative<T> {
    token: AuthorityToken,
    inner: T,
}

impl<T> Authoritative<T> {
    pub fn new(token: AuthorityToken, inner: T) -> Self {
        Self { token, inner }
    }

    /// Read access, identical to a replica's view
    pub fn get(&self) -> &T {
        &self.inner
    }

    pub fn token(&self) -> &AuthorityToken {
        &self.token
    }

    /// Borrow the token and the value mutably at the same time
    pub fn split(&mut self) -> (&AuthorityToken, &mut T) {
        (&self.token, &mut self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_authority() {
        let authority = Uuid::new_v4();
        let replica = Uuid::new_v4();

        let on_authority = AuthorityResolver::new(authority, authority);
        let on_replica = AuthorityResolver::new(replica, authority);

        let flag = EntityRef::Flag(Team::TeamA);
        assert!(on_authority.is_authority_for(&flag));
        assert!(!on_replica.is_authority_for(&flag));
    }

    #[test]
    fn test_claim_on_replica_fails() {
        let authority = Uuid::new_v4();
        let replica = AuthorityResolver::new(Uuid::new_v4(), authority);

        let err = replica.claim(&EntityRef::Roster).unwrap_err();
        assert_eq!(err.owner, authority);
        assert_eq!(err.entity, EntityKind::Roster);
        assert!(replica.claim_all().is_err());
    }

    #[test]
    fn test_claim_scope() {
        let host = Uuid::new_v4();
        let resolver = AuthorityResolver::local_authority(host);

        let token = resolver.claim(&EntityRef::Flag(Team::TeamB)).unwrap();
        assert!(token.covers(EntityKind::Flag));
        assert!(!token.covers(EntityKind::TeamLedger));
        assert_eq!(token.host(), host);

        let all = resolver.claim_all().unwrap();
        for kind in EntityKind::ALL {
            assert!(all.covers(kind));
        }
        assert!(all.require_all(&EntityKind::ALL).is_ok());
    }

    #[test]
    fn test_require_outside_scope() {
        let host_a = Uuid::new_v4();
        let host_b = Uuid::new_v4();
        let resolver = AuthorityResolver::new(host_a, host_a).with_owner(EntityKind::Custody, host_b);

        let token = resolver.claim(&EntityRef::Flag(Team::TeamA)).unwrap();
        assert!(token.require(EntityKind::Flag).is_ok());

        let err = token.require(EntityKind::Custody).unwrap_err();
        assert_eq!(err.local, host_a);
        assert_eq!(err.owner, host_b);
        assert_eq!(err.entity, EntityKind::Custody);

        let err = token
            .require_all(&[EntityKind::Flag, EntityKind::Roster])
            .unwrap_err();
        assert_eq!(err.entity, EntityKind::Roster);
        assert_eq!(err.owner, host_a);
    }

    #[test]
    fn test_split_ownership() {
        let host_a = Uuid::new_v4();
        let host_b = Uuid::new_v4();

        // Scores live on host B, everything else on host A
        let on_a = AuthorityResolver::new(host_a, host_a).with_owner(EntityKind::TeamLedger, host_b);
        let on_b = AuthorityResolver::new(host_b, host_a).with_owner(EntityKind::TeamLedger, host_b);

        let ledger = EntityRef::TeamLedger(Team::TeamA);
        let flag = EntityRef::Flag(Team::TeamA);

        assert!(!on_a.is_authority_for(&ledger));
        assert!(on_a.is_authority_for(&flag));
        assert!(on_b.is_authority_for(&ledger));
        assert!(!on_b.is_authority_for(&flag));

        // Exactly one owner for each entity
        for entity in [ledger, flag, EntityRef::Roster] {
            let owners = [&on_a, &on_b]
                .iter()
                .filter(|r| r.is_authority_for(&entity))
                .count();
            assert_eq!(owners, 1);
        }

        assert!(on_a.claim_all().is_err());
    }

    #[test]
    fn test_authoritative_split() {
        let resolver = AuthorityResolver::local_authority(Uuid::new_v4());
        let mut value = Authoritative::new(resolver.claim_all().unwrap(), 5u32);

        let (token, inner) = value.split();
        assert!(token.covers(EntityKind::Coin));
        *inner += 1;

        assert_eq!(*value.get(), 6);
    }
}
