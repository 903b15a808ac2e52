//! A small Markov-chain predictor over observed PC transitions, used to
//! prioritize the compile queue toward regions likely to run again soon
//! rather than strictly by raw hit count.

use std::collections::HashMap;

/// First- and second-order transition tables: `last_pc -> {next_pc: count}`
/// and `(prev_pc, last_pc) -> {next_pc: count}`. The second-order table
/// takes priority when it has enough samples to be confident.
pub struct MarkovPredictor {
    first_order: HashMap<u64, HashMap<u64, u32>>,
    second_order: HashMap<(u64, u64), HashMap<u64, u32>>,
    history: (Option<u64>, Option<u64>),
}

const SECOND_ORDER_CONFIDENCE_THRESHOLD: u32 = 4;

impl MarkovPredictor {
    pub fn new() -> Self {
        MarkovPredictor { first_order: HashMap::new(), second_order: HashMap::new(), history: (None, None) }
    }

    pub fn observe_transition(&mut self, from_pc: u64, to_pc: u64) {
        *self.first_order.entry(from_pc).or_default().entry(to_pc).or_insert(0) += 1;
        if let (Some(prev), Some(last)) = self.history {
            if last == from_pc {
                *self
                    .second_order
                    .entry((prev, last))
                    .or_default()
                    .entry(to_pc)
                    .or_insert(0) += 1;
            }
        }
        self.history = (self.history.1, Some(from_pc));
    }

    /// The most likely next PC after `pc`, if any transition has been seen.
    pub fn predict(&self, prev_pc: Option<u64>, pc: u64) -> Option<u64> {
        if let Some(prev) = prev_pc {
            if let Some(table) = self.second_order.get(&(prev, pc)) {
                if let Some((&next, &count)) = table.iter().max_by_key(|(_, c)| **c) {
                    if count >= SECOND_ORDER_CONFIDENCE_THRESHOLD {
                        return Some(next);
                    }
                }
            }
        }
        self.first_order.get(&pc).and_then(|table| table.iter().max_by_key(|(_, c)| **c).map(|(&next, _)| next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicts_most_frequent_successor() {
        let mut p = MarkovPredictor::new();
        for _ in 0..5 {
            p.observe_transition(0x1000, 0x1010);
        }
        p.observe_transition(0x1000, 0x2000);
        assert_eq!(p.predict(None, 0x1000), Some(0x1010));
    }
}
