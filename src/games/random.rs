//! Random sources for game draws

use crate::common::traits::RandomSource;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Production source backed by the thread-local RNG, so concurrent callers
/// never contend on shared state
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn coin(&self) -> bool {
        rand::thread_rng().gen_bool(0.5)
    }

    fn index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len.max(1))
    }

    fn unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// One pre-recorded draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedDraw {
    Coin(bool),
    Index(usize),
    Unit(f64),
}

/// Replays a fixed sequence of draws, then falls back to `ThreadRandom`.
/// A scripted value of the wrong kind is skipped.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    script: Mutex<VecDeque<ScriptedDraw>>,
}

impl ScriptedRandom {
    pub fn new(draws: impl IntoIterator<Item = ScriptedDraw>) -> Self {
        Self {
            script: Mutex::new(draws.into_iter().collect()),
        }
    }

    pub fn push(&self, draw: ScriptedDraw) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(draw);
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }

    fn next(&self) -> Option<ScriptedDraw> {
        self.script.lock().ok().and_then(|mut script| script.pop_front())
    }
}

impl RandomSource for ScriptedRandom {
    fn coin(&self) -> bool {
        match self.next() {
            Some(ScriptedDraw::Coin(value)) => value,
            _ => ThreadRandom.coin(),
        }
    }

    fn index(&self, len: usize) -> usize {
        match self.next() {
            Some(ScriptedDraw::Index(value)) if value < len => value,
            _ => ThreadRandom.index(len),
        }
    }

    fn unit(&self) -> f64 {
        match self.next() {
            Some(ScriptedDraw::Unit(value)) if (0.0..1.0).contains(&value) => value,
            _ => ThreadRandom.unit(),
        }
    }
}
