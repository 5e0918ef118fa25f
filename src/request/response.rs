use std::{collections::HashSet, mem};

use crate::core::types::{CapabilityRecord, CommandError, ErrorCode, Target};

/// What the backend (or the local pre-filter) has reported for one task.
///
/// Records are kept until the coordinator delivers them to the caller. The
/// set of answered targets survives delivery and is used to tell which
/// targets are still missing when the task ends.
#[derive(Debug, Default)]
pub struct TaskResponse {
    internal_error: Option<ErrorCode>,
    command_error: Option<CommandError>,
    network_response: Option<(u16, String)>,
    terminated: Option<(String, u64)>,
    updated: Vec<CapabilityRecord>,
    removed: Vec<CapabilityRecord>,
    cached: Vec<CapabilityRecord>,
    answered: HashSet<Target>,
}

impl TaskResponse {
    pub fn internal_error(&self) -> Option<ErrorCode> {
        self.internal_error
    }

    pub fn set_internal_error(&mut self, code: ErrorCode) {
        self.internal_error = Some(code);
    }

    pub fn command_error(&self) -> Option<CommandError> {
        self.command_error
    }

    pub fn set_command_error(&mut self, error: CommandError) {
        self.command_error = Some(error);
    }

    pub fn network_response(&self) -> Option<(u16, &str)> {
        self.network_response
            .as_ref()
            .map(|(code, reason)| (*code, reason.as_str()))
    }

    pub fn set_network_response(&mut self, sip_code: u16, reason: String) {
        self.network_response = Some((sip_code, reason));
    }

    pub fn terminated_reason(&self) -> Option<&str> {
        self.terminated.as_ref().map(|(reason, _)| reason.as_str())
    }

    pub fn set_terminated(&mut self, reason: String, retry_after_ms: u64) {
        self.terminated = Some((reason, retry_after_ms));
    }

    /// Retry-after hint of the termination, 0 when there was none.
    pub fn retry_after_ms(&self) -> u64 {
        self.terminated.as_ref().map_or(0, |(_, retry)| *retry)
    }

    pub fn add_updated(&mut self, records: Vec<CapabilityRecord>) {
        self.mark_answered(&records);
        self.updated.extend(records);
    }

    pub fn add_removed(&mut self, records: Vec<CapabilityRecord>) {
        self.mark_answered(&records);
        self.removed.extend(records);
    }

    pub fn add_cached(&mut self, records: Vec<CapabilityRecord>) {
        self.mark_answered(&records);
        self.cached.extend(records);
    }

    fn mark_answered(&mut self, records: &[CapabilityRecord]) {
        self.answered
            .extend(records.iter().map(|record| record.target.clone()));
    }

    pub fn is_answered(&self, target: &Target) -> bool {
        self.answered.contains(target)
    }

    /// Targets of `targets` without any record so far, in input order.
    pub fn unanswered(&self, targets: &[Target]) -> Vec<Target> {
        targets
            .iter()
            .filter(|target| !self.answered.contains(*target))
            .cloned()
            .collect()
    }

    pub fn all_answered(&self, targets: &[Target]) -> bool {
        targets.iter().all(|target| self.answered.contains(target))
    }

    /// Drain the records not yet handed to the caller: cached first, then
    /// updated, then terminated ones.
    pub fn take_undelivered(&mut self) -> Vec<CapabilityRecord> {
        let mut records = mem::take(&mut self.cached);
        records.append(&mut self.updated);
        records.append(&mut self.removed);
        records
    }
}
