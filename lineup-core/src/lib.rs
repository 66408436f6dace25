use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

pub type PlayerName = String;

/// Canonical form of a footballer name: trimmed, lowercased, accents
/// stripped. Uniqueness checks and catalog lookups compare this form, so
/// "Kaká", "KAKA" and " kaka " all name the same footballer.
pub fn canonical_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// One lineup group per formation entry, e.g. [1,4,4,2] gives four groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineupGrid {
    pub groups: Vec<Vec<Option<String>>>,
}

impl LineupGrid {
    pub fn new(formation: &[u32]) -> Self {
        Self {
            groups: formation.iter().map(|&c| vec![None; c as usize]).collect(),
        }
    }

    pub fn slot(&self, group: usize, index: usize) -> Option<&Option<String>> {
        self.groups.get(group).and_then(|g| g.get(index))
    }

    pub fn filled(&self) -> impl Iterator<Item = &String> {
        self.groups.iter().flatten().filter_map(|s| s.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Nationality,
    Club,
    League,
}

/// The active guessing challenge, e.g. nationality = "Brazil".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub value: String,
}

impl Condition {
    pub fn is_met_by(&self, attrs: &PlayerAttributes) -> bool {
        let actual = match self.kind {
            ConditionKind::Nationality => &attrs.nationality,
            ConditionKind::Club => &attrs.club,
            ConditionKind::League => &attrs.league,
        };
        actual.eq_ignore_ascii_case(&self.value)
    }
}

/// Canonical footballer attributes as reported by the lookup collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerAttributes {
    pub nationality: String,
    pub club: String,
    pub league: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GameEvent {
    PlayerJoined {
        name: PlayerName,
    },
    ConditionSet {
        by: PlayerName,
        condition: Condition,
    },
    GuessAccepted {
        by: PlayerName,
        slot_group: usize,
        slot_index: usize,
        footballer: String,
        current_index: usize,
        picker_index: usize,
        condition: Option<Condition>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("formation must be a non-empty list of positive slot counts")]
    InvalidFormation,
    #[error("name taken")]
    NameTaken,
    #[error("not your turn")]
    NotYourTurn,
    #[error("a condition is already active")]
    ConditionAlreadySet,
    #[error("no active condition")]
    NoActiveCondition,
    #[error("slot does not exist or is already filled")]
    SlotOutOfRange,
    #[error("footballer already used in this session")]
    AlreadyUsed,
    #[error("unknown player")]
    UnknownPlayer,
    #[error("player is not in this session")]
    UnknownMember,
    #[error("guess does not satisfy the active condition")]
    ConditionMismatch,
    #[error("turn state changed while the guess was in flight")]
    TurnChanged,
}

/// Snapshot taken by `validate_guess` before the lookup suspension point.
/// `apply_guess` refuses the ticket if the session mutated in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessTicket {
    epoch: u64,
    condition: Condition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub code: String,
    pub formation: Vec<u32>,
    pub players: Vec<PlayerName>,
    pub lineups: HashMap<PlayerName, LineupGrid>,
    pub current_index: usize,
    pub picker_index: usize,
    pub condition: Option<Condition>,
    pub used_players: HashSet<String>,
    /// Bumped by every mutation that can affect turn math; backs GuessTicket.
    pub turn_epoch: u64,
}

impl Session {
    pub fn new(code: impl Into<String>, formation: Vec<u32>) -> Result<Self, GameError> {
        if formation.is_empty() || formation.iter().any(|&c| c == 0) {
            return Err(GameError::InvalidFormation);
        }
        Ok(Self {
            code: code.into(),
            formation,
            players: Vec::new(),
            lineups: HashMap::new(),
            current_index: 0,
            picker_index: 0,
            condition: None,
            used_players: HashSet::new(),
            turn_epoch: 0,
        })
    }

    pub fn join(&mut self, name: impl Into<PlayerName>) -> Result<GameEvent, GameError> {
        let name = name.into();
        if self.players.contains(&name) {
            return Err(GameError::NameTaken);
        }
        self.lineups
            .insert(name.clone(), LineupGrid::new(&self.formation));
        self.players.push(name.clone());
        self.turn_epoch += 1;
        Ok(GameEvent::PlayerJoined { name })
    }

    fn index_of(&self, name: &str) -> Result<usize, GameError> {
        self.players
            .iter()
            .position(|p| p == name)
            .ok_or(GameError::UnknownMember)
    }

    /// Only the picker may set a condition, and only while none is active.
    /// Setting it starts the round: the guessing turn moves to the seat
    /// after the picker.
    pub fn set_condition(
        &mut self,
        player: &str,
        condition: Condition,
    ) -> Result<GameEvent, GameError> {
        let index = self.index_of(player)?;
        if index != self.picker_index {
            return Err(GameError::NotYourTurn);
        }
        if self.condition.is_some() {
            return Err(GameError::ConditionAlreadySet);
        }
        self.condition = Some(condition.clone());
        // The round's lap runs from the seat after the picker back around to
        // the picker; the picker never guesses in their own round.
        self.current_index = (self.picker_index + 1) % self.players.len();
        self.turn_epoch += 1;
        Ok(GameEvent::ConditionSet {
            by: player.to_string(),
            condition,
        })
    }

    /// Pre-lookup half of a guess: every check that needs no external data,
    /// in order, mutating nothing. The returned ticket pins the turn state
    /// the guess was validated against.
    pub fn validate_guess(
        &self,
        player: &str,
        slot_group: usize,
        slot_index: usize,
        footballer: &str,
    ) -> Result<GuessTicket, GameError> {
        let index = self.index_of(player)?;
        if index != self.current_index || self.current_index == self.picker_index {
            return Err(GameError::NotYourTurn);
        }
        let condition = match &self.condition {
            Some(c) => c.clone(),
            None => return Err(GameError::NoActiveCondition),
        };
        let grid = self.lineups.get(player).ok_or(GameError::UnknownMember)?;
        match grid.slot(slot_group, slot_index) {
            Some(None) => {}
            _ => return Err(GameError::SlotOutOfRange),
        }
        if self.used_players.contains(&canonical_name(footballer)) {
            return Err(GameError::AlreadyUsed);
        }
        Ok(GuessTicket {
            epoch: self.turn_epoch,
            condition,
        })
    }

    /// Post-lookup half: re-validates the ticket, checks the condition
    /// against the looked-up attributes, then commits and advances the turn.
    /// Any failure leaves the session untouched.
    pub fn apply_guess(
        &mut self,
        ticket: &GuessTicket,
        player: &str,
        slot_group: usize,
        slot_index: usize,
        footballer: &str,
        attrs: &PlayerAttributes,
    ) -> Result<GameEvent, GameError> {
        if ticket.epoch != self.turn_epoch {
            return Err(GameError::TurnChanged);
        }
        if !ticket.condition.is_met_by(attrs) {
            return Err(GameError::ConditionMismatch);
        }
        let grid = self
            .lineups
            .get_mut(player)
            .ok_or(GameError::UnknownMember)?;
        let slot = grid
            .groups
            .get_mut(slot_group)
            .and_then(|g| g.get_mut(slot_index))
            .ok_or(GameError::SlotOutOfRange)?;
        // The slot keeps the name as submitted; uniqueness is tracked in
        // canonical form.
        *slot = Some(footballer.to_string());
        self.used_players.insert(canonical_name(footballer));
        self.advance_turn();
        Ok(GameEvent::GuessAccepted {
            by: player.to_string(),
            slot_group,
            slot_index,
            footballer: footballer.to_string(),
            current_index: self.current_index,
            picker_index: self.picker_index,
            condition: self.condition.clone(),
        })
    }

    /// Round-robin rule: landing back on the picker completes the round,
    /// rotates picking duty and clears the condition. With one player this
    /// fires on every call, which is the correct degenerate behavior.
    /// Turn order is undefined for an empty roster.
    fn advance_turn(&mut self) {
        debug_assert!(!self.players.is_empty());
        self.current_index = (self.current_index + 1) % self.players.len();
        if self.current_index == self.picker_index {
            self.picker_index = (self.picker_index + 1) % self.players.len();
            self.condition = None;
        }
        self.turn_epoch += 1;
    }

    /// Defensive structural check; a failure here is fatal to the session.
    pub fn invariants_hold(&self) -> bool {
        if !self.players.is_empty()
            && (self.current_index >= self.players.len() || self.picker_index >= self.players.len())
        {
            return false;
        }
        if self.players.len() != self.lineups.len() {
            return false;
        }
        for name in &self.players {
            let Some(grid) = self.lineups.get(name) else {
                return false;
            };
            if grid.groups.len() != self.formation.len()
                || grid
                    .groups
                    .iter()
                    .zip(&self.formation)
                    .any(|(g, &c)| g.len() != c as usize)
            {
                return false;
            }
        }
        let mut seen = HashSet::new();
        for grid in self.lineups.values() {
            for footballer in grid.filled() {
                let canonical = canonical_name(footballer);
                if !self.used_players.contains(&canonical) || !seen.insert(canonical) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nationality(value: &str) -> Condition {
        Condition {
            kind: ConditionKind::Nationality,
            value: value.to_string(),
        }
    }

    fn brazilian() -> PlayerAttributes {
        PlayerAttributes {
            nationality: "Brazil".into(),
            club: "Santos".into(),
            league: "Brasileirão".into(),
        }
    }

    fn two_player_session() -> Session {
        let mut session = Session::new("abc123", vec![1, 2]).unwrap();
        session.join("A").unwrap();
        session.join("B").unwrap();
        session
    }

    fn guess(
        session: &mut Session,
        player: &str,
        group: usize,
        index: usize,
        footballer: &str,
        attrs: &PlayerAttributes,
    ) -> Result<GameEvent, GameError> {
        let ticket = session.validate_guess(player, group, index, footballer)?;
        session.apply_guess(&ticket, player, group, index, footballer, attrs)
    }

    #[test]
    fn rejects_degenerate_formations() {
        assert_eq!(Session::new("x", vec![]), Err(GameError::InvalidFormation));
        assert_eq!(
            Session::new("x", vec![1, 0, 2]),
            Err(GameError::InvalidFormation)
        );
    }

    #[test]
    fn join_allocates_grid_and_rejects_duplicates() {
        let mut session = Session::new("abc123", vec![1, 4, 4, 2]).unwrap();
        let event = session.join("A").unwrap();
        assert_eq!(event, GameEvent::PlayerJoined { name: "A".into() });
        assert_eq!(session.join("A"), Err(GameError::NameTaken));

        let grid = &session.lineups["A"];
        assert_eq!(
            grid.groups.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![1, 4, 4, 2]
        );
        assert!(grid.groups.iter().flatten().all(Option::is_none));
        assert!(session.invariants_hold());
    }

    #[test]
    fn full_lap_rotates_picker_and_clears_condition_once() {
        let mut session = Session::new("abc123", vec![1]).unwrap();
        for name in ["A", "B", "C", "D"] {
            session.join(name).unwrap();
        }
        // Round-start alignment: the lap begins on the picker's own seat.
        session.current_index = 2;
        session.picker_index = 2;
        session.condition = Some(nationality("Brazil"));

        let mut clears = 0;
        for _ in 0..session.players.len() {
            let had = session.condition.is_some();
            session.advance_turn();
            if had && session.condition.is_none() {
                clears += 1;
            }
            assert!(session.current_index < session.players.len());
            assert!(session.picker_index < session.players.len());
        }
        assert_eq!(session.current_index, 2);
        assert_eq!(session.picker_index, 3);
        assert_eq!(clears, 1);
    }

    #[test]
    fn single_player_rotation_clears_condition_every_turn() {
        let mut session = Session::new("abc123", vec![1]).unwrap();
        session.join("A").unwrap();
        session.condition = Some(nationality("Brazil"));
        session.advance_turn();
        assert_eq!(session.current_index, 0);
        assert_eq!(session.picker_index, 0);
        assert_eq!(session.condition, None);
    }

    #[test]
    fn condition_set_only_by_picker_and_only_once() {
        let mut session = two_player_session();
        assert_eq!(
            session.set_condition("B", nationality("Brazil")),
            Err(GameError::NotYourTurn)
        );
        assert_eq!(
            session.set_condition("ghost", nationality("Brazil")),
            Err(GameError::UnknownMember)
        );
        session.set_condition("A", nationality("Brazil")).unwrap();
        assert_eq!(
            session.set_condition("A", nationality("Spain")),
            Err(GameError::ConditionAlreadySet)
        );
    }

    #[test]
    fn setting_condition_hands_turn_to_first_non_picker() {
        let mut session = two_player_session();
        assert_eq!(session.current_index, 0);
        assert_eq!(session.picker_index, 0);
        session.set_condition("A", nationality("Brazil")).unwrap();
        assert_eq!(session.current_index, 1);
        assert_eq!(session.picker_index, 0);
    }

    #[test]
    fn three_player_round_laps_all_non_pickers() {
        let mut session = Session::new("abc123", vec![2]).unwrap();
        for name in ["A", "B", "C"] {
            session.join(name).unwrap();
        }
        session.set_condition("A", nationality("Brazil")).unwrap();
        assert_eq!(session.current_index, 1);
        guess(&mut session, "B", 0, 0, "Neymar", &brazilian()).unwrap();
        assert_eq!(session.current_index, 2);
        guess(&mut session, "C", 0, 0, "Pelé", &brazilian()).unwrap();
        // Lap complete: picking duty moves to B.
        assert_eq!(session.picker_index, 1);
        assert_eq!(session.condition, None);

        // Round two starts at the seat after B: C guesses, then A.
        session.set_condition("B", nationality("Brazil")).unwrap();
        assert_eq!(session.current_index, 2);
        guess(&mut session, "C", 0, 1, "Ronaldinho", &brazilian()).unwrap();
        guess(&mut session, "A", 0, 0, "Kaká", &brazilian()).unwrap();
        assert_eq!(session.picker_index, 2);
        assert_eq!(session.condition, None);
        assert!(session.invariants_hold());
    }

    #[test]
    fn picker_guess_attempt_is_rejected() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();
        assert_eq!(
            session.validate_guess("A", 0, 0, "Neymar"),
            Err(GameError::NotYourTurn)
        );
    }

    #[test]
    fn guess_requires_active_condition() {
        let mut session = two_player_session();
        session.current_index = 1;
        assert_eq!(
            session.validate_guess("B", 0, 0, "Neymar"),
            Err(GameError::NoActiveCondition)
        );
    }

    #[test]
    fn accepted_guess_fills_slot_and_completes_the_round() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();

        let event = guess(&mut session, "B", 1, 0, "Neymar", &brazilian()).unwrap();
        assert_eq!(
            event,
            GameEvent::GuessAccepted {
                by: "B".into(),
                slot_group: 1,
                slot_index: 0,
                footballer: "Neymar".into(),
                current_index: 0,
                picker_index: 1,
                condition: None,
            }
        );
        assert_eq!(
            session.lineups["B"].slot(1, 0),
            Some(&Some("Neymar".to_string()))
        );
        assert!(session.used_players.contains("neymar"));
        // B's guess lapped back to the picker: round over, picking rotates.
        assert_eq!(session.current_index, 0);
        assert_eq!(session.picker_index, 1);
        assert_eq!(session.condition, None);
        assert!(session.invariants_hold());
    }

    #[test]
    fn duplicate_footballer_rejected_across_players_and_rounds() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();
        guess(&mut session, "B", 0, 0, "Neymar", &brazilian()).unwrap();

        // Next round: B picks, A guesses, same footballer.
        session.set_condition("B", nationality("Brazil")).unwrap();
        let before = session.clone();
        assert_eq!(
            session.validate_guess("A", 0, 0, "Neymar"),
            Err(GameError::AlreadyUsed)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn filled_or_missing_slot_is_out_of_range() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();
        guess(&mut session, "B", 1, 1, "Neymar", &brazilian()).unwrap();

        session.set_condition("B", nationality("Brazil")).unwrap();
        let before = session.clone();
        assert_eq!(
            session.validate_guess("A", 5, 0, "Pelé"),
            Err(GameError::SlotOutOfRange)
        );
        assert_eq!(
            session.validate_guess("A", 1, 9, "Pelé"),
            Err(GameError::SlotOutOfRange)
        );
        assert_eq!(session, before);

        // Come back around to B and hit the slot B already filled.
        guess(&mut session, "A", 0, 0, "Pelé", &brazilian()).unwrap();
        session.set_condition("A", nationality("Brazil")).unwrap();
        assert_eq!(
            session.validate_guess("B", 1, 1, "Ronaldinho"),
            Err(GameError::SlotOutOfRange)
        );
    }

    #[test]
    fn canonical_name_folds_case_whitespace_and_accents() {
        assert_eq!(canonical_name("Kaká"), "kaka");
        assert_eq!(canonical_name("  NEYMAR  "), "neymar");
        assert_eq!(canonical_name("Vinícius Júnior"), "vinicius junior");
    }

    #[test]
    fn footballer_uniqueness_ignores_case_and_accents() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();
        guess(&mut session, "B", 0, 0, "Kaká", &brazilian()).unwrap();
        assert_eq!(session.lineups["B"].slot(0, 0), Some(&Some("Kaká".to_string())));

        session.set_condition("B", nationality("Brazil")).unwrap();
        let before = session.clone();
        assert_eq!(
            session.validate_guess("A", 0, 0, "KAKA"),
            Err(GameError::AlreadyUsed)
        );
        assert_eq!(
            session.validate_guess("A", 0, 0, "  kaká  "),
            Err(GameError::AlreadyUsed)
        );
        assert_eq!(session, before);
        assert!(session.invariants_hold());
    }

    #[test]
    fn condition_mismatch_leaves_state_unchanged() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Spain")).unwrap();
        let before = session.clone();
        assert_eq!(
            guess(&mut session, "B", 0, 0, "Neymar", &brazilian()),
            Err(GameError::ConditionMismatch)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn condition_matching_is_case_insensitive_per_kind() {
        let condition = Condition {
            kind: ConditionKind::Club,
            value: "santos".into(),
        };
        assert!(condition.is_met_by(&brazilian()));
        let condition = Condition {
            kind: ConditionKind::League,
            value: "La Liga".into(),
        };
        assert!(!condition.is_met_by(&brazilian()));
    }

    #[test]
    fn stale_ticket_is_rejected_with_turn_changed() {
        let mut session = two_player_session();
        session.set_condition("A", nationality("Brazil")).unwrap();
        let ticket = session.validate_guess("B", 0, 0, "Neymar").unwrap();
        // A third player joins while the lookup is in flight.
        session.join("C").unwrap();
        let before = session.clone();
        assert_eq!(
            session.apply_guess(&ticket, "B", 0, 0, "Neymar", &brazilian()),
            Err(GameError::TurnChanged)
        );
        assert_eq!(session, before);
    }

    #[test]
    fn invariants_detect_corruption() {
        let mut session = two_player_session();
        assert!(session.invariants_hold());
        session.current_index = 7;
        assert!(!session.invariants_hold());

        let mut session = two_player_session();
        // A filled slot whose value never entered used_players.
        if let Some(grid) = session.lineups.get_mut("A") {
            grid.groups[0][0] = Some("Neymar".into());
        }
        assert!(!session.invariants_hold());
    }
}
