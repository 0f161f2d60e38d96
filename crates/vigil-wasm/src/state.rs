//! Session bookkeeping exposed to the JavaScript layer.

use serde::{Deserialize, Serialize};
use vigil_core::{Envelope, Message};

/// Counters for one client session.
///
/// Verdicts are counted as they are delivered, whether the recipient is an
/// external caller or the transaction checker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Seqno of the key block the trusted epoch came from.
    pub epoch_seqno: u32,
    /// Key blocks that advanced the epoch.
    pub key_blocks_accepted: u64,
    /// Block checks answered `Correct`, including those asked by the checker.
    pub blocks_attested: u64,
    /// Key blocks or block checks answered `Reject`, including those asked by
    /// the checker.
    pub blocks_rejected: u64,
    /// Transactions confirmed in an attested block.
    pub transactions_checked: u64,
    /// Messages that failed while being handled.
    pub failed_deliveries: u64,
}

impl SessionStats {
    pub fn new(epoch_seqno: u32) -> Self {
        Self {
            epoch_seqno,
            ..Self::default()
        }
    }

    /// Count a delivered envelope.
    pub fn record(&mut self, envelope: &Envelope) {
        match envelope.body {
            Message::Ok { .. } => self.key_blocks_accepted += 1,
            Message::Correct { .. } => self.blocks_attested += 1,
            Message::Reject { .. } => self.blocks_rejected += 1,
            Message::TransactionChecked { .. } => self.transactions_checked += 1,
            _ => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failed_deliveries += 1;
    }

    /// Share of block verdicts that were rejections (0.0 - 1.0).
    pub fn rejection_rate(&self) -> f64 {
        let verdicts = self.key_blocks_accepted + self.blocks_attested + self.blocks_rejected;
        if verdicts == 0 {
            return 0.0;
        }
        self.blocks_rejected as f64 / verdicts as f64
    }
}
