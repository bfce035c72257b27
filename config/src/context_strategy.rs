//! Context persistence strategy (spec.md §4.B, §6 `CONTEXT_STRATEGY`).

use std::str::FromStr;
use std::sync::Arc;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStrategy {
    None,
    Summary,
    Stateful,
    Hybrid,
}

impl ContextStrategy {
    pub fn wants_summary(self) -> bool {
        matches!(self, ContextStrategy::Summary | ContextStrategy::Hybrid)
    }

    pub fn wants_stateful(self) -> bool {
        matches!(self, ContextStrategy::Stateful | ContextStrategy::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextStrategy::None => "none",
            ContextStrategy::Summary => "summary",
            ContextStrategy::Stateful => "stateful",
            ContextStrategy::Hybrid => "hybrid",
        }
    }
}

impl FromStr for ContextStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ContextStrategy::None),
            "summary" => Ok(ContextStrategy::Summary),
            "stateful" => Ok(ContextStrategy::Stateful),
            "hybrid" => Ok(ContextStrategy::Hybrid),
            _ => Err(()),
        }
    }
}

/// Process-wide register for the active [`ContextStrategy`]. The Command
/// Interceptor (spec.md §4.G) mutates this directly; the Context Manager
/// reads it fresh at the start of every prompt instead of capturing a value
/// in a long-lived closure.
#[derive(Clone)]
pub struct ContextStrategyRegister(Arc<RwLock<ContextStrategy>>);

impl ContextStrategyRegister {
    pub fn new(initial: ContextStrategy) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn get(&self) -> ContextStrategy {
        *self.0.read().expect("context strategy lock poisoned")
    }

    pub fn set(&self, strategy: ContextStrategy) {
        *self.0.write().expect("context strategy lock poisoned") = strategy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("HYBRID".parse::<ContextStrategy>().unwrap(), ContextStrategy::Hybrid);
    }

    #[test]
    fn register_reflects_latest_set() {
        let reg = ContextStrategyRegister::new(ContextStrategy::None);
        assert_eq!(reg.get(), ContextStrategy::None);
        reg.set(ContextStrategy::Hybrid);
        assert_eq!(reg.get(), ContextStrategy::Hybrid);
    }
}
