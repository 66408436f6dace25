use std::collections::HashMap;

use async_trait::async_trait;
use lineup_core::{canonical_name, PlayerAttributes};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("player lookup unavailable")]
    Unavailable,
}

/// The external sports-data collaborator: resolves a footballer name to the
/// canonical attributes a condition is checked against. `Ok(None)` means the
/// name is not a recognized footballer; `Unavailable` is transient and safe
/// to retry.
#[async_trait]
pub trait PlayerLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<PlayerAttributes>, LookupError>;
}

/// In-memory catalog, keyed by canonical name so case and accent variants
/// of the same footballer resolve to one entry. Stands in for the
/// third-party sports API; also the fixture used throughout the tests.
#[derive(Debug, Default)]
pub struct StaticLookup {
    players: HashMap<String, PlayerAttributes>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small starter roster so the server is playable out of the box.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (name, nationality, club, league) in [
            ("Neymar", "Brazil", "Santos", "Brasileirão"),
            ("Lionel Messi", "Argentina", "Inter Miami", "MLS"),
            ("Kylian Mbappé", "France", "Real Madrid", "Spanish La Liga"),
            ("Vinícius Júnior", "Brazil", "Real Madrid", "Spanish La Liga"),
            ("Erling Haaland", "Norway", "Manchester City", "English Premier League"),
            ("Harry Kane", "England", "Bayern Munich", "German Bundesliga"),
            ("Lautaro Martínez", "Argentina", "Inter", "Italian Serie A"),
        ] {
            catalog.insert(
                name,
                PlayerAttributes {
                    nationality: nationality.to_string(),
                    club: club.to_string(),
                    league: league.to_string(),
                },
            );
        }
        catalog
    }

    pub fn insert(&mut self, name: &str, attrs: PlayerAttributes) {
        self.players.insert(canonical_name(name), attrs);
    }
}

#[async_trait]
impl PlayerLookup for StaticLookup {
    async fn lookup(&self, name: &str) -> Result<Option<PlayerAttributes>, LookupError> {
        Ok(self.players.get(&canonical_name(name)).cloned())
    }
}
