//! The authoritative game state the sync layer reads and writes.
//!
//! Only the host's copy is ground truth. Everything here is plain data
//! plus the few state transitions the game needs (add player, start,
//! advance turn); legality of network input is checked elsewhere, in
//! [`MessageValidator`](crate::MessageValidator), before any of these
//! are reached.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use dicelink_protocol::{DICE_COUNT, PeerId};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::GameError;

/// Rolls a player may take in one turn.
pub const MAX_ROLLS_PER_TURN: u8 = 3;

/// Upper-section total that earns the bonus.
pub const UPPER_BONUS_THRESHOLD: u32 = 63;

/// Points awarded for reaching [`UPPER_BONUS_THRESHOLD`].
pub const UPPER_BONUS: u32 = 50;

// ---------------------------------------------------------------------------
// ScoreCategory
// ---------------------------------------------------------------------------

/// The fifteen Yatzy scoring categories.
///
/// Serialized (and parsed from score selections) by variant name, e.g.
/// `"FullHouse"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ScoreCategory {
    Ones,
    Twos,
    Threes,
    Fours,
    Fives,
    Sixes,
    OnePair,
    TwoPairs,
    ThreeOfAKind,
    FourOfAKind,
    SmallStraight,
    LargeStraight,
    FullHouse,
    Chance,
    Yatzy,
}

impl ScoreCategory {
    /// Every category, upper section first.
    pub const ALL: [ScoreCategory; 15] = [
        Self::Ones,
        Self::Twos,
        Self::Threes,
        Self::Fours,
        Self::Fives,
        Self::Sixes,
        Self::OnePair,
        Self::TwoPairs,
        Self::ThreeOfAKind,
        Self::FourOfAKind,
        Self::SmallStraight,
        Self::LargeStraight,
        Self::FullHouse,
        Self::Chance,
        Self::Yatzy,
    ];

    /// The variant name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ones => "Ones",
            Self::Twos => "Twos",
            Self::Threes => "Threes",
            Self::Fours => "Fours",
            Self::Fives => "Fives",
            Self::Sixes => "Sixes",
            Self::OnePair => "OnePair",
            Self::TwoPairs => "TwoPairs",
            Self::ThreeOfAKind => "ThreeOfAKind",
            Self::FourOfAKind => "FourOfAKind",
            Self::SmallStraight => "SmallStraight",
            Self::LargeStraight => "LargeStraight",
            Self::FullHouse => "FullHouse",
            Self::Chance => "Chance",
            Self::Yatzy => "Yatzy",
        }
    }

    /// Name for score sheets.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OnePair => "One Pair",
            Self::TwoPairs => "Two Pairs",
            Self::ThreeOfAKind => "Three of a Kind",
            Self::FourOfAKind => "Four of a Kind",
            Self::SmallStraight => "Small Straight (1-5)",
            Self::LargeStraight => "Large Straight (2-6)",
            Self::FullHouse => "Full House",
            Self::Yatzy => "YATZY!",
            other => other.as_str(),
        }
    }

    /// Ones through Sixes.
    pub fn is_upper_section(self) -> bool {
        matches!(
            self,
            Self::Ones
                | Self::Twos
                | Self::Threes
                | Self::Fours
                | Self::Fives
                | Self::Sixes
        )
    }

    /// The face an upper-section category counts, 1 to 6.
    pub fn face(self) -> Option<u8> {
        match self {
            Self::Ones => Some(1),
            Self::Twos => Some(2),
            Self::Threes => Some(3),
            Self::Fours => Some(4),
            Self::Fives => Some(5),
            Self::Sixes => Some(6),
            _ => None,
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name did not match any category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown score category {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for ScoreCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScoreCard
// ---------------------------------------------------------------------------

/// One player's score sheet. A category is either scored once or open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    scores: BTreeMap<ScoreCategory, u32>,
}

impl ScoreCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scored(&self, category: ScoreCategory) -> bool {
        self.scores.contains_key(&category)
    }

    pub fn score(&self, category: ScoreCategory) -> Option<u32> {
        self.scores.get(&category).copied()
    }

    /// Writes a score into an open category.
    ///
    /// # Errors
    /// [`GameError::CategoryTaken`] if the category was already scored.
    pub fn record(
        &mut self,
        category: ScoreCategory,
        points: u32,
    ) -> Result<(), GameError> {
        if self.is_scored(category) {
            return Err(GameError::CategoryTaken(category));
        }
        self.scores.insert(category, points);
        Ok(())
    }

    pub fn upper_total(&self) -> u32 {
        self.section_total(true)
    }

    /// [`UPPER_BONUS`] once the upper total reaches the threshold.
    pub fn upper_bonus(&self) -> u32 {
        if self.upper_total() >= UPPER_BONUS_THRESHOLD {
            UPPER_BONUS
        } else {
            0
        }
    }

    pub fn lower_total(&self) -> u32 {
        self.section_total(false)
    }

    pub fn total(&self) -> u32 {
        self.upper_total() + self.upper_bonus() + self.lower_total()
    }

    pub fn is_complete(&self) -> bool {
        ScoreCategory::ALL.iter().all(|c| self.is_scored(*c))
    }

    /// Categories still open, in sheet order.
    pub fn available_categories(&self) -> Vec<ScoreCategory> {
        ScoreCategory::ALL
            .into_iter()
            .filter(|c| !self.is_scored(*c))
            .collect()
    }

    fn section_total(&self, upper: bool) -> u32 {
        self.scores
            .iter()
            .filter(|(c, _)| c.is_upper_section() == upper)
            .map(|(_, points)| points)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Dice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Die {
    /// Face value, 1 to 6.
    pub value: u8,
    pub held: bool,
}

impl Default for Die {
    fn default() -> Self {
        Self {
            value: 1,
            held: false,
        }
    }
}

/// The five dice on the table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceSet {
    pub dice: [Die; DICE_COUNT],
}

impl DiceSet {
    pub fn values(&self) -> [u8; DICE_COUNT] {
        self.dice.map(|d| d.value)
    }

    pub fn held(&self) -> [bool; DICE_COUNT] {
        self.dice.map(|d| d.held)
    }

    /// Overwrites every die.
    pub fn set(&mut self, values: [u8; DICE_COUNT], held: [bool; DICE_COUNT]) {
        for ((die, value), held) in self.dice.iter_mut().zip(values).zip(held) {
            die.value = value;
            die.held = held;
        }
    }

    /// Back to the default face with nothing held.
    pub fn reset(&mut self) {
        self.dice = [Die::default(); DICE_COUNT];
    }

    /// A fresh roll: held dice keep their value, the rest are re-rolled.
    /// The set itself is not changed.
    pub fn roll_with<R: Rng>(
        &self,
        held: [bool; DICE_COUNT],
        rng: &mut R,
    ) -> [u8; DICE_COUNT] {
        let mut values = self.values();
        for (value, held) in values.iter_mut().zip(held) {
            if !held {
                *value = rng.random_range(1..=6);
            }
        }
        values
    }
}

// ---------------------------------------------------------------------------
// Player / GameState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Players are identified by the peer they play from.
    pub id: PeerId,
    pub name: String,
    pub score_card: ScoreCard,
}

impl Player {
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            score_card: ScoreCard::new(),
        }
    }

    pub fn total_score(&self) -> u32 {
        self.score_card.total()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    SinglePlayer,
    #[default]
    Multiplayer,
}

impl GameMode {
    pub fn min_players(self) -> usize {
        match self {
            Self::SinglePlayer => 1,
            Self::Multiplayer => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SinglePlayer => "single_player",
            Self::Multiplayer => "multiplayer",
        }
    }
}

/// The whole game: who plays, whose turn it is, what the dice show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub players: Vec<Player>,
    pub dice: DiceSet,
    pub current_player_index: usize,
    /// Rolls taken in the current turn, 0 to [`MAX_ROLLS_PER_TURN`].
    pub rolls_this_turn: u8,
    /// Starts at 1 and goes up each time play wraps to the first player.
    pub round: u32,
    pub mode: GameMode,
    pub started: bool,
    pub complete: bool,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seats a player. Only before the game starts; names are trimmed and
    /// must be unique (case-insensitively), as must ids.
    pub fn add_player(
        &mut self,
        id: PeerId,
        name: &str,
    ) -> Result<(), GameError> {
        if self.started {
            return Err(GameError::AlreadyStarted);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::BlankName);
        }
        if self.players.iter().any(|p| p.id == id) {
            return Err(GameError::DuplicatePlayer(id));
        }
        if self
            .players
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Err(GameError::DuplicateName(name.to_string()));
        }
        self.players.push(Player::new(id, name));
        Ok(())
    }

    /// Removes a player who left before the game started.
    pub fn remove_player(&mut self, id: &PeerId) -> Option<Player> {
        if self.started {
            return None;
        }
        let index = self.players.iter().position(|p| &p.id == id)?;
        Some(self.players.remove(index))
    }

    pub fn start(&mut self, mode: GameMode) -> Result<(), GameError> {
        if self.started {
            return Err(GameError::AlreadyStarted);
        }
        if self.players.len() < mode.min_players() {
            return Err(GameError::NotEnoughPlayers {
                needed: mode.min_players(),
                seated: self.players.len(),
            });
        }
        self.mode = mode;
        self.started = true;
        self.complete = false;
        self.current_player_index = 0;
        self.rolls_this_turn = 0;
        self.round = 1;
        self.dice.reset();
        Ok(())
    }

    /// `true` between start and completion.
    pub fn in_progress(&self) -> bool {
        self.started && !self.complete
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_player_index)
    }

    pub fn is_current_player(&self, id: &PeerId) -> bool {
        self.current_player().is_some_and(|p| &p.id == id)
    }

    pub fn player(&self, id: &PeerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_mut(&mut self, id: &PeerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn player_index(&self, id: &PeerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == id)
    }

    pub fn rolls_remaining(&self) -> u8 {
        MAX_ROLLS_PER_TURN.saturating_sub(self.rolls_this_turn)
    }

    /// Hands the turn to `index`: rolls and dice are reset.
    pub fn set_turn(&mut self, index: usize) {
        if index <= self.current_player_index {
            self.round += 1;
        }
        self.current_player_index = index;
        self.rolls_this_turn = 0;
        self.dice.reset();
        self.refresh_complete();
    }

    /// Seat index after the current one, wrapping to the first.
    pub fn next_index(&self) -> Option<usize> {
        self.current_player_index
            .checked_add(1)?
            .checked_rem(self.players.len())
    }

    /// The player who moves after the current one.
    pub fn next_player(&self) -> Option<&Player> {
        self.players.get(self.next_index()?)
    }

    /// Passes the turn to the next seat.
    pub fn advance_turn(&mut self) {
        if let Some(next) = self.next_index() {
            self.set_turn(next);
        }
    }

    /// Checks the invariants a state received from elsewhere must hold
    /// before it replaces ours.
    pub fn check_consistency(&self) -> Result<(), GameError> {
        if self.started && self.players.is_empty() {
            return Err(GameError::Inconsistent("started without players"));
        }
        if self.complete && !self.started {
            return Err(GameError::Inconsistent("complete but never started"));
        }
        if !self.players.is_empty() && self.current_player_index >= self.players.len() {
            return Err(GameError::Inconsistent("current player out of range"));
        }
        if self.rolls_this_turn > MAX_ROLLS_PER_TURN {
            return Err(GameError::Inconsistent("too many rolls this turn"));
        }
        if self.dice.values().iter().any(|v| !(1..=6).contains(v)) {
            return Err(GameError::Inconsistent("die face out of range"));
        }
        let mut ids: Vec<&PeerId> = self.players.iter().map(|p| &p.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != self.players.len() {
            return Err(GameError::Inconsistent("duplicate player"));
        }
        Ok(())
    }

    /// The game ends when every sheet is full.
    pub fn refresh_complete(&mut self) {
        self.complete = self.started
            && !self.players.is_empty()
            && self.players.iter().all(|p| p.score_card.is_complete());
    }

    /// Highest total wins; ties share. Empty until the game is complete.
    pub fn winners(&self) -> Vec<&Player> {
        if !self.complete {
            return Vec::new();
        }
        let Some(best) = self.players.iter().map(Player::total_score).max()
        else {
            return Vec::new();
        };
        self.players
            .iter()
            .filter(|p| p.total_score() == best)
            .collect()
    }

    /// Totals per player, for a game-end message.
    pub fn final_scores(&self) -> BTreeMap<PeerId, u32> {
        self.players
            .iter()
            .map(|p| (p.id.clone(), p.total_score()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_players() -> GameState {
        let mut state = GameState::new();
        state.add_player(PeerId::new("a"), "Astrid").unwrap();
        state.add_player(PeerId::new("b"), "Bo").unwrap();
        state
    }

    #[test]
    fn test_score_category_from_str_exact_names() {
        assert_eq!("Ones".parse(), Ok(ScoreCategory::Ones));
        assert_eq!("FullHouse".parse(), Ok(ScoreCategory::FullHouse));
        assert!("ones".parse::<ScoreCategory>().is_err());
        assert!("Full House".parse::<ScoreCategory>().is_err());
    }

    #[test]
    fn test_score_category_sections() {
        let upper = ScoreCategory::ALL
            .iter()
            .filter(|c| c.is_upper_section())
            .count();
        assert_eq!(upper, 6);
        assert_eq!(ScoreCategory::Yatzy.display_name(), "YATZY!");
        assert_eq!(ScoreCategory::Fours.face(), Some(4));
        assert_eq!(ScoreCategory::Chance.face(), None);
    }

    #[test]
    fn test_score_card_empty_has_every_category_open() {
        let card = ScoreCard::new();
        assert_eq!(card.available_categories().len(), 15);
        assert_eq!(card.total(), 0);
        assert!(!card.is_complete());
    }

    #[test]
    fn test_score_card_record_twice_fails() {
        let mut card = ScoreCard::new();
        card.record(ScoreCategory::Chance, 22).unwrap();
        assert_eq!(
            card.record(ScoreCategory::Chance, 10),
            Err(GameError::CategoryTaken(ScoreCategory::Chance))
        );
        assert_eq!(card.score(ScoreCategory::Chance), Some(22));
    }

    #[test]
    fn test_score_card_upper_bonus_at_63() {
        let mut card = ScoreCard::new();
        card.record(ScoreCategory::Fours, 12).unwrap();
        card.record(ScoreCategory::Fives, 15).unwrap();
        card.record(ScoreCategory::Sixes, 18).unwrap();
        card.record(ScoreCategory::Threes, 9).unwrap();
        card.record(ScoreCategory::Twos, 6).unwrap();
        assert_eq!(card.upper_total(), 60);
        assert_eq!(card.upper_bonus(), 0);

        card.record(ScoreCategory::Ones, 3).unwrap();
        assert_eq!(card.upper_total(), 63);
        assert_eq!(card.upper_bonus(), 50);

        card.record(ScoreCategory::Yatzy, 50).unwrap();
        assert_eq!(card.lower_total(), 50);
        assert_eq!(card.total(), 163);
    }

    #[test]
    fn test_score_card_serializes_by_category_name() {
        let mut card = ScoreCard::new();
        card.record(ScoreCategory::FullHouse, 19).unwrap();
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["scores"]["FullHouse"], 19);
    }

    #[test]
    fn test_dice_set_reset_restores_default_face() {
        let mut dice = DiceSet::default();
        dice.set([6, 5, 4, 3, 2], [true, false, true, false, false]);
        dice.reset();
        assert_eq!(dice.values(), [1; 5]);
        assert_eq!(dice.held(), [false; 5]);
    }

    #[test]
    fn test_dice_set_roll_with_keeps_held_dice() {
        let mut dice = DiceSet::default();
        dice.set([6, 6, 6, 2, 3], [false; 5]);
        let held = [true, true, true, false, false];
        let mut rng = rand::rng();
        for _ in 0..50 {
            let values = dice.roll_with(held, &mut rng);
            assert_eq!(&values[..3], &[6, 6, 6]);
            assert!(values.iter().all(|v| (1..=6).contains(v)));
        }
    }

    #[test]
    fn test_add_player_rules() {
        let mut state = two_players();
        assert_eq!(
            state.add_player(PeerId::new("c"), "  "),
            Err(GameError::BlankName)
        );
        assert_eq!(
            state.add_player(PeerId::new("c"), "astrid"),
            Err(GameError::DuplicateName("astrid".into()))
        );
        assert_eq!(
            state.add_player(PeerId::new("a"), "Alva"),
            Err(GameError::DuplicatePlayer(PeerId::new("a")))
        );

        state.start(GameMode::Multiplayer).unwrap();
        assert_eq!(
            state.add_player(PeerId::new("c"), "Cilla"),
            Err(GameError::AlreadyStarted)
        );
    }

    #[test]
    fn test_start_needs_two_for_multiplayer() {
        let mut state = GameState::new();
        state.add_player(PeerId::new("a"), "Astrid").unwrap();
        assert!(matches!(
            state.start(GameMode::Multiplayer),
            Err(GameError::NotEnoughPlayers { needed: 2, seated: 1 })
        ));
        state.start(GameMode::SinglePlayer).unwrap();
        assert!(state.in_progress());
        assert_eq!(state.round, 1);
    }

    #[test]
    fn test_advance_turn_wraps_and_resets_dice() {
        let mut state = two_players();
        state.start(GameMode::Multiplayer).unwrap();
        state.dice.set([5, 5, 5, 5, 5], [true; 5]);
        state.rolls_this_turn = 2;

        state.advance_turn();
        assert_eq!(state.current_player().unwrap().name, "Bo");
        assert_eq!(state.rolls_this_turn, 0);
        assert_eq!(state.dice, DiceSet::default());
        assert_eq!(state.round, 1);

        state.advance_turn();
        assert!(state.is_current_player(&PeerId::new("a")));
        assert_eq!(state.round, 2);
    }

    #[test]
    fn test_winners_only_when_complete() {
        let mut state = two_players();
        state.start(GameMode::Multiplayer).unwrap();
        assert!(state.winners().is_empty());

        for category in ScoreCategory::ALL {
            let a = state.player_mut(&PeerId::new("a")).unwrap();
            a.score_card.record(category, 2).unwrap();
            let b = state.player_mut(&PeerId::new("b")).unwrap();
            b.score_card.record(category, 1).unwrap();
        }
        state.refresh_complete();
        assert!(state.complete);

        let winners = state.winners();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].name, "Astrid");
        assert_eq!(state.final_scores()[&PeerId::new("b")], 15);
    }

    #[test]
    fn test_game_state_json_round_trip() {
        let mut state = two_players();
        state.start(GameMode::Multiplayer).unwrap();
        state
            .player_mut(&PeerId::new("a"))
            .unwrap()
            .score_card
            .record(ScoreCategory::Ones, 3)
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
    #[test]
    fn test_next_player_wraps_to_first_seat() {
        let mut state = two_players();
        assert_eq!(state.next_player().unwrap().id, PeerId::new("b"));
        state.set_turn(1);
        assert_eq!(state.next_player().unwrap().id, PeerId::new("a"));
        assert!(GameState::new().next_player().is_none());
    }

    #[test]
    fn test_check_consistency_accepts_normal_play() {
        let mut state = two_players();
        state.start(GameMode::Multiplayer).unwrap();
        state.rolls_this_turn = MAX_ROLLS_PER_TURN;
        assert!(state.check_consistency().is_ok());
        assert!(GameState::new().check_consistency().is_ok());
    }

    #[test]
    fn test_check_consistency_rejects_broken_states() {
        let mut out_of_range = two_players();
        out_of_range.current_player_index = 7;

        let mut empty_started = GameState::new();
        empty_started.started = true;

        let mut too_many_rolls = two_players();
        too_many_rolls.rolls_this_turn = MAX_ROLLS_PER_TURN + 1;

        let mut duplicate = two_players();
        duplicate.players[1].id = PeerId::new("a");

        let mut never_started = two_players();
        never_started.complete = true;

        for state in [out_of_range, empty_started, too_many_rolls, duplicate, never_started] {
            assert!(matches!(
                state.check_consistency(),
                Err(GameError::Inconsistent(_))
            ));
        }
    }

    #[test]
    fn test_check_consistency_rejects_bad_die_face() {
        let mut state = two_players();
        state.dice.dice[2].value = 9;
        assert!(matches!(
            state.check_consistency(),
            Err(GameError::Inconsistent("die face out of range"))
        ));
    }
}
