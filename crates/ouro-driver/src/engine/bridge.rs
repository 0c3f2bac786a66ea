//! The `llm_query` bridge from sandbox to driver.

use async_trait::async_trait;

use crate::models::RuntimeModels;
use crate::sandbox::HostBridge;

use super::Driver;

/// Bridge installed for one agent's turns.
///
/// A call recurses into [`Driver::subagent`] one level deeper, tagged with
/// this agent's run id and reusing the resolved model pair, so the whole
/// tree shares one ledger, one sink, and one model resolution. Failures
/// (the depth cap, any child-side error) are returned as messages, which
/// the evaluator raises inside the calling code; the parent then observes
/// them as an `Error:` line in its captured output and can adapt.
pub(super) struct TurnBridge<'a> {
    pub driver: &'a Driver,
    pub run_id: String,
    pub depth: u32,
    pub models: &'a RuntimeModels,
}

#[async_trait]
impl HostBridge for TurnBridge<'_> {
    async fn llm_query(
        &mut self,
        context: String,
    ) -> std::result::Result<serde_json::Value, String> {
        let max_depth = self.driver.limits().max_depth;
        if self.depth >= max_depth {
            return Err(format!(
                "MAXIMUM DEPTH REACHED: depth {} agents may not spawn sub-agents (limit {})",
                self.depth, max_depth
            ));
        }

        self.driver
            .subagent(
                context,
                self.depth + 1,
                Some(self.run_id.clone()),
                Some(self.models.clone()),
            )
            .await
            .map_err(|e| e.to_string())
    }
}
