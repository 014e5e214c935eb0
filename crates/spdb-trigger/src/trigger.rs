use serde_json::Value;

use spdb_types::StructuralChange;

/// Data a condition hands to the actions it matched for.
pub type TriggerToken = Value;

/// Decides whether a structural change should fire a trigger.
pub trait TriggerCondition: Send + Sync {
    /// Returns a token for the actions if the change matches.
    fn matches(&self, change: &StructuralChange) -> Option<TriggerToken>;
}

/// Work run when a condition matches. Runs on a pool worker.
pub trait TriggerAction: Send + Sync {
    fn run(&self, change: &StructuralChange, token: &TriggerToken) -> anyhow::Result<()>;
}
