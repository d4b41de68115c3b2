//! Access control lists.
//!
//! An ACL is an ordered list of entries. Evaluation walks the list and the
//! first entry that both names the requested operation and matches the
//! principal decides; if none does, access is denied.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{ObjectError, ObjectId, Result};

/// Operations guarded by a file's ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOp {
    CreateFile,
    DeleteFile,
    InspectFile,
    LockFile,
    ReadFile,
    #[serde(rename = "setACL")]
    SetAcl,
    SetFileLength,
    SetUserAndGroup,
    WriteFile,
}

impl FileOp {
    /// Every operation that applies to an existing file.
    pub const FILE_OPS: [FileOp; 8] = [
        FileOp::DeleteFile,
        FileOp::InspectFile,
        FileOp::LockFile,
        FileOp::ReadFile,
        FileOp::SetAcl,
        FileOp::SetFileLength,
        FileOp::SetUserAndGroup,
        FileOp::WriteFile,
    ];
}

/// Selects the principals an entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    Owner,
    Group,
    Individual(ObjectId),
    All,
}

impl Matcher {
    pub fn matches(&self, principal: &ObjectId, owner: &ObjectId, group: &ObjectId) -> bool {
        match self {
            Matcher::Owner => principal == owner,
            Matcher::Group => principal == group,
            Matcher::Individual(id) => principal == id,
            Matcher::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Disposition {
    Grant,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub matcher: Matcher,
    pub privileges: BTreeSet<FileOp>,
    pub disposition: Disposition,
}

impl AccessControlEntry {
    pub fn grant(matcher: Matcher, ops: impl IntoIterator<Item = FileOp>) -> Self {
        Self {
            matcher,
            privileges: ops.into_iter().collect(),
            disposition: Disposition::Grant,
        }
    }

    pub fn deny(matcher: Matcher, ops: impl IntoIterator<Item = FileOp>) -> Self {
        Self {
            matcher,
            privileges: ops.into_iter().collect(),
            disposition: Disposition::Deny,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    entries: Vec<AccessControlEntry>,
}

impl AccessControlList {
    pub fn new(entries: Vec<AccessControlEntry>) -> Self {
        Self { entries }
    }

    /// Owner may do anything; group members and everyone else may read.
    pub fn default_file_acl() -> Self {
        Self::new(vec![
            AccessControlEntry::grant(Matcher::Owner, FileOp::FILE_OPS),
            AccessControlEntry::grant(Matcher::Group, [FileOp::ReadFile]),
            AccessControlEntry::grant(Matcher::All, [FileOp::ReadFile]),
        ])
    }

    pub fn entries(&self) -> &[AccessControlEntry] {
        &self.entries
    }

    /// Append an entry (evaluated after all existing ones).
    pub fn with(mut self, entry: AccessControlEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Prepend an entry so that it takes precedence over existing ones.
    pub fn with_first(mut self, entry: AccessControlEntry) -> Self {
        self.entries.insert(0, entry);
        self
    }

    pub fn evaluate(
        &self,
        op: FileOp,
        principal: &ObjectId,
        owner: &ObjectId,
        group: &ObjectId,
    ) -> Disposition {
        self.entries
            .iter()
            .find(|e| e.privileges.contains(&op) && e.matcher.matches(principal, owner, group))
            .map(|e| e.disposition)
            .unwrap_or(Disposition::Deny)
    }

    pub fn permits(&self, op: FileOp, principal: &ObjectId, owner: &ObjectId, group: &ObjectId) -> bool {
        self.evaluate(op, principal, owner, group) == Disposition::Grant
    }

    /// JSON text form stored in file attributes.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ObjectError::Acl(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ObjectError::Acl(e.to_string()))
    }
}
