use network_recorder::{critical_request_chains, longest_chain_length, CriticalChains};
use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::json;

use super::{default_pass_records, DEVTOOLS_LOGS};

pub const NAME: &str = "critical-request-chains";

/// Chains of high-priority requests the page waits on during load.
#[derive(Debug, Default)]
pub struct CriticalRequestChains;

impl Audit for CriticalRequestChains {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Critical Request Chains".to_string(),
            required_artifacts: vec![DEVTOOLS_LOGS.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let records = default_pass_records(artifacts)?;
        let chains = critical_request_chains(&records);
        let chain_count = count_leaves(&chains);
        let longest = longest_chain_length(&chains);

        let tree = serde_json::to_value(&chains)
            .map_err(|err| AuditError::Failed(format!("unable to serialize chains: {err}")))?;
        Ok(AuditOutcome::binary(chain_count == 0)
            .with_display(format!("{chain_count} chains found"))
            .with_details(json!({
                "chains": tree,
                "longestChain": { "length": longest },
            })))
    }
}

/// Each leaf ends one chain.
fn count_leaves(chains: &CriticalChains) -> usize {
    chains
        .values()
        .map(|node| {
            if node.children.is_empty() {
                1
            } else {
                count_leaves(&node.children)
            }
        })
        .sum()
}
