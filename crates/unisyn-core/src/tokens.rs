/// Counts tokens for history budgeting. Must be deterministic for a given text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u64;
}

/// Rough estimate of one token per four characters, rounded up.
///
/// Close enough to GPT-style tokenizers for budgeting context windows;
/// swap in a real tokenizer behind [`TokenCounter`] when exact counts matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count_tokens(&self, text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(4)
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> u64 + Send + Sync,
{
    fn count_tokens(&self, text: &str) -> u64 {
        self(text)
    }
}
