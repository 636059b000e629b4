// ABOUTME: Chain extensions that request extra read rounds with mutated options
//
// A chain is compiled in and looked up by name; nothing executable crosses
// the control protocol. The read pipeline calls `next()` before each round
// and keeps going while `order() < turn()`.

use std::collections::HashMap;

use serde_json::Value;

use super::codec::Options;
use super::error::{BrokerError, BrokerResult};

/// Per-handle behavior driving repeated reads
pub trait Chain: Send {
    /// Prepare options for the next round
    fn next(&mut self, options: &mut Options);

    /// Number of rounds requested
    fn turn(&self) -> u32;

    /// Rounds started so far
    fn order(&self) -> u32;
}

type ChainFactory = Box<dyn Fn(&Options) -> Box<dyn Chain> + Send + Sync>;

/// Named chain constructors
#[derive(Default)]
pub struct ChainRegistry {
    factories: HashMap<String, ChainFactory>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `paginate`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("paginate", |options| Box::new(Paginate::from_options(options)));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Options) -> Box<dyn Chain> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate the chain called `name` from the handle options
    pub fn build(&self, name: &str, options: &Options) -> BrokerResult<Box<dyn Chain>> {
        self.factories
            .get(name)
            .map(|factory| factory(options))
            .ok_or_else(|| BrokerError::UnknownChain(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// === Paginate ===

/// Bumps a numeric query parameter once per round.
///
/// Reads `chain_param` (default `page`) and `chain_turn` (default 1) from the
/// options; the first round uses the parameter's current value (default 1).
#[derive(Debug, Clone)]
pub struct Paginate {
    param: String,
    start: u64,
    turn: u32,
    order: u32,
}

impl Paginate {
    pub fn from_options(options: &Options) -> Self {
        let param = options
            .get("chain_param")
            .and_then(Value::as_str)
            .unwrap_or("page")
            .to_string();
        let turn = options
            .get("chain_turn")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1);
        let start = options
            .get("params")
            .and_then(|params| params.get(&param))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(1);

        Self {
            param,
            start,
            turn,
            order: 0,
        }
    }
}

impl Chain for Paginate {
    fn next(&mut self, options: &mut Options) {
        let page = self.start + u64::from(self.order);
        self.order = self.order.saturating_add(1);

        let params = options
            .entry("params")
            .or_insert_with(|| Value::Object(Options::new()));
        if !params.is_object() {
            *params = Value::Object(Options::new());
        }
        if let Value::Object(params) = params {
            params.insert(self.param.clone(), Value::from(page));
        }
    }

    fn turn(&self) -> u32 {
        self.turn
    }

    fn order(&self) -> u32 {
        self.order
    }
}
