use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Number of cards in the reference deck.
pub const DEFAULT_DECK_SIZE: usize = 36;
pub const DEFAULT_CARD_EXTENSION: &str = "jpg";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThemeError {
    #[error("Theme must not be empty")]
    Empty,
    #[error("Theme '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidCharacters(String),
}

/// Lower-cases a theme name and checks that it is usable as a card file prefix.
pub fn normalize_theme(raw: &str) -> Result<String, ThemeError> {
    let theme = raw.trim().to_lowercase();
    if theme.is_empty() {
        return Err(ThemeError::Empty);
    }
    if !theme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ThemeError::InvalidCharacters(theme));
    }
    Ok(theme)
}

/// Card identifier for the 1-based `index` of a theme, e.g. `stone_00007.jpg`.
pub fn card_id(theme: &str, index: usize, extension: &str) -> String {
    format!("{}_{:05}.{}", theme, index, extension)
}

/// The shared card supply of a room. Cards only ever leave it.
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<String>,
}

impl Deck {
    /// Builds `count` cards for `theme` and shuffles them (Fisher-Yates).
    pub fn generate<R: Rng + ?Sized>(
        theme: &str,
        count: usize,
        extension: &str,
        rng: &mut R,
    ) -> Self {
        let mut cards: Vec<String> = (1..=count)
            .map(|index| card_id(theme, index, extension))
            .collect();
        cards.shuffle(rng);
        Self { cards }
    }

    /// Removes the next card. `None` means the supply is exhausted.
    pub fn draw(&mut self) -> Option<String> {
        self.cards.pop()
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
