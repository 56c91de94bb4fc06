//! Token counting contract used for memory pruning.

use crate::prompt::PromptStack;

/// Default characters-per-token ratio for [`SimpleTokenizer`].
pub const DEFAULT_CHARACTERS_PER_TOKEN: usize = 4;

/// Counts tokens the way a prompt driver's backend would.
pub trait Tokenizer: Send + Sync {
    /// Counts the tokens in a piece of text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Maximum number of input tokens the backend accepts.
    fn max_input_tokens(&self) -> usize;

    /// Counts the tokens of a whole prompt stack.
    fn count_stack_tokens(&self, stack: &PromptStack) -> usize {
        self.count_tokens(&stack.to_text())
    }

    /// Tokens left for a stack after keeping `reserve` tokens free.
    ///
    /// Returns `None` once the stack does not fit.
    fn remaining(&self, stack: &PromptStack, reserve: usize) -> Option<usize> {
        let budget = self.max_input_tokens().checked_sub(reserve)?;
        budget.checked_sub(self.count_stack_tokens(stack))
    }
}

/// Approximates token counts from character length.
///
/// # Example
///
/// ```
/// use weave_core::tokenizer::{SimpleTokenizer, Tokenizer};
///
/// let tokenizer = SimpleTokenizer::new(100);
/// assert_eq!(tokenizer.count_tokens("abcdefgh"), 2);
/// assert_eq!(tokenizer.count_tokens("abcdefghi"), 3);
/// ```
#[derive(Clone, Debug)]
pub struct SimpleTokenizer {
    characters_per_token: usize,
    max_input_tokens: usize,
}

impl SimpleTokenizer {
    /// Creates a tokenizer with the default ratio.
    pub fn new(max_input_tokens: usize) -> Self {
        Self {
            characters_per_token: DEFAULT_CHARACTERS_PER_TOKEN,
            max_input_tokens,
        }
    }

    /// Sets the characters-per-token ratio (minimum 1).
    pub fn with_characters_per_token(mut self, ratio: usize) -> Self {
        self.characters_per_token = ratio.max(1);
        self
    }
}

impl Tokenizer for SimpleTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.characters_per_token)
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }
}
