//! Token-budget pruning for prompt assembly.
//!
//! `TokenLimiter` implements the four-step pruning algorithm: never prune
//! the question (or other inputs explicitly marked unprunable), drop
//! oversized history messages, round-robin-trim document lists, then
//! truncate free-form extras last. Token counting is delegated to a
//! [`TokenCounter`] supplied by the caller — in the application, this
//! wraps the model handle's real tokenizer and falls back to
//! `len(text)/4` if that call fails; this crate only knows the algorithm,
//! not how to count tokens for a specific model.

use std::collections::HashMap;

use crate::model::ScoredDocument;

/// Counts tokens in a string. Implementations may delegate to a real
/// tokenizer or approximate.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `len(text)/4` heuristic, used when no real tokenizer is available.
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// One turn of conversation history under consideration for pruning.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub content: String,
}

/// The inputs a pipeline assembles into a prompt, before budgeting.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub question: String,
    pub history: Vec<HistoryMessage>,
    /// Independent document lists (e.g. per-source retrieval results),
    /// each trimmed round-robin rather than emptied one at a time.
    pub document_lists: Vec<Vec<ScoredDocument>>,
    pub extras: HashMap<String, String>,
}

/// Outcome of a budgeting pass.
#[derive(Debug, Clone)]
pub enum PruneOutcome {
    Fits(PromptInputs),
    /// An unprunable input alone exceeds the budget; the caller must
    /// surface `INPUT_SIZE_WARNING` and skip the model call.
    InputSizeWarning,
}

/// Tracks the effective token budget and applies the pruning algorithm.
pub struct TokenLimiter<'a> {
    pub max_tokens: usize,
    pub reserved: usize,
    pub prompt_scaffold_tokens: usize,
    /// Fraction of `effective_max` above which a single history message
    /// is considered oversized. Defaults to `0.5`.
    pub large_msg_fraction: f64,
    /// Minimum number of history messages kept regardless of budget.
    pub min_history_messages: usize,
    /// Minimum number of documents kept per list regardless of budget.
    pub min_docs: usize,
    counter: &'a dyn TokenCounter,
}

impl<'a> TokenLimiter<'a> {
    pub fn new(max_tokens: usize, reserved: usize, prompt_scaffold_tokens: usize, counter: &'a dyn TokenCounter) -> Self {
        Self {
            max_tokens,
            reserved,
            prompt_scaffold_tokens,
            large_msg_fraction: 0.5,
            min_history_messages: 2,
            min_docs: 0,
            counter,
        }
    }

    pub fn effective_max(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved).saturating_sub(self.prompt_scaffold_tokens)
    }

    fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    fn total_tokens(&self, inputs: &PromptInputs) -> usize {
        let question = self.count(&inputs.question);
        let history: usize = inputs.history.iter().map(|m| self.count(&m.content)).sum();
        let docs: usize = inputs.document_lists.iter().flatten().map(|d| self.count(&d.text)).sum();
        let extras: usize = inputs.extras.values().map(|v| self.count(v)).sum();
        question + history + docs + extras
    }

    /// Applies the four-step pruning algorithm, returning the pruned
    /// inputs or a warning if the question alone cannot fit.
    pub fn prune(&self, mut inputs: PromptInputs) -> PruneOutcome {
        let budget = self.effective_max();

        // Step 1: never prune the question; bail if it alone overflows.
        if self.count(&inputs.question) > budget {
            return PruneOutcome::InputSizeWarning;
        }

        if self.total_tokens(&inputs) <= budget {
            return PruneOutcome::Fits(inputs);
        }

        // Step 2a: drop oversized history messages first.
        let large_threshold = (budget as f64 * self.large_msg_fraction) as usize;
        inputs.history.retain(|m| self.count(&m.content) <= large_threshold);
        if self.total_tokens(&inputs) <= budget {
            return PruneOutcome::Fits(inputs);
        }

        // Step 2b: drop oldest history messages down to min_history_messages.
        while inputs.history.len() > self.min_history_messages && self.total_tokens(&inputs) > budget {
            inputs.history.remove(0);
        }
        if self.total_tokens(&inputs) <= budget {
            return PruneOutcome::Fits(inputs);
        }

        // Step 3: round-robin trim the last document off each list.
        loop {
            if self.total_tokens(&inputs) <= budget {
                break;
            }
            let any_trimmed = inputs
                .document_lists
                .iter_mut()
                .fold(false, |trimmed, list| {
                    if list.len() > self.min_docs {
                        list.pop();
                        true
                    } else {
                        trimmed
                    }
                });
            if !any_trimmed {
                break;
            }
        }
        if self.total_tokens(&inputs) <= budget {
            return PruneOutcome::Fits(inputs);
        }

        // Step 4: truncate extras last, one key at a time, until the
        // budget is met or every extra has been emptied.
        let keys: Vec<String> = inputs.extras.keys().cloned().collect();
        for key in keys {
            if self.total_tokens(&inputs) <= budget {
                break;
            }
            if let Some(value) = inputs.extras.get_mut(&key) {
                value.clear();
            }
        }

        PruneOutcome::Fits(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> ScoredDocument {
        ScoredDocument {
            resource_hash: "r".to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 1.0,
            display_name: "r".to_string(),
            source_url: None,
        }
    }

    #[test]
    fn question_alone_over_budget_yields_warning() {
        let counter = ApproxTokenCounter;
        let limiter = TokenLimiter::new(10, 0, 0, &counter);
        let inputs = PromptInputs {
            question: "x".repeat(1000),
            history: vec![],
            document_lists: vec![],
            extras: HashMap::new(),
        };
        assert!(matches!(limiter.prune(inputs), PruneOutcome::InputSizeWarning));
    }

    #[test]
    fn inputs_within_budget_are_untouched() {
        let counter = ApproxTokenCounter;
        let limiter = TokenLimiter::new(1000, 0, 0, &counter);
        let inputs = PromptInputs {
            question: "short question".to_string(),
            history: vec![HistoryMessage { content: "hi".to_string() }],
            document_lists: vec![vec![doc("some doc text")]],
            extras: HashMap::new(),
        };
        match limiter.prune(inputs.clone()) {
            PruneOutcome::Fits(pruned) => {
                assert_eq!(pruned.history.len(), inputs.history.len());
                assert_eq!(pruned.document_lists[0].len(), 1);
            }
            PruneOutcome::InputSizeWarning => panic!("should have fit"),
        }
    }

    #[test]
    fn oversized_history_messages_are_dropped_first() {
        let counter = ApproxTokenCounter;
        // effective_max = 1000 tokens; large_msg_threshold = 500 tokens = 2000 chars.
        let limiter = TokenLimiter::new(1000, 0, 0, &counter);
        let mut history = vec![HistoryMessage { content: "a".repeat(2004) }, HistoryMessage { content: "b".repeat(2004) }];
        for i in 0..18 {
            history.push(HistoryMessage { content: format!("msg {i}") });
        }
        let inputs = PromptInputs { question: "q".to_string(), history, document_lists: vec![], extras: HashMap::new() };
        match limiter.prune(inputs) {
            PruneOutcome::Fits(pruned) => {
                assert!(pruned.history.iter().all(|m| !m.content.starts_with('a') && !m.content.starts_with('b')));
            }
            PruneOutcome::InputSizeWarning => panic!("should have fit after dropping oversized messages"),
        }
    }

    #[test]
    fn min_history_messages_is_respected() {
        let counter = ApproxTokenCounter;
        let limiter = TokenLimiter::new(5, 0, 0, &counter);
        let history = vec![
            HistoryMessage { content: "a".repeat(400) },
            HistoryMessage { content: "b".repeat(400) },
            HistoryMessage { content: "c".repeat(400) },
        ];
        let inputs = PromptInputs { question: "q".to_string(), history, document_lists: vec![], extras: HashMap::new() };
        match limiter.prune(inputs) {
            PruneOutcome::Fits(pruned) => assert_eq!(pruned.history.len(), limiter.min_history_messages),
            PruneOutcome::InputSizeWarning => panic!("question alone fits"),
        }
    }

    #[test]
    fn document_lists_are_trimmed_round_robin() {
        let counter = ApproxTokenCounter;
        let limiter = TokenLimiter::new(10, 0, 0, &counter);
        let lists = vec![vec![doc(&"x".repeat(100)), doc(&"y".repeat(100))], vec![doc(&"z".repeat(100))]];
        let inputs = PromptInputs { question: "q".to_string(), history: vec![], document_lists: lists, extras: HashMap::new() };
        match limiter.prune(inputs) {
            PruneOutcome::Fits(pruned) => {
                let total_docs: usize = pruned.document_lists.iter().map(|l| l.len()).sum();
                assert!(total_docs <= 1);
            }
            PruneOutcome::InputSizeWarning => panic!("question alone fits"),
        }
    }
}
