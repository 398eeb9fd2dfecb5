//! Hierarchical path permissions.
//!
//! A [`PathPermission`] grants or rejects capability bits for one subject
//! on a subtree. The rules applicable to a request are folded into one
//! effective [`Permission`] by [`resolve_permissions`]:
//!
//! - deeper rules take precedence over shallower ones, whatever their subject
//! - at equal depth, user rules beat group rules, which beat anonymous rules
//! - within a subject class, lower `policy` values come first
//! - a reject removes its bits from what was granted so far, and no
//!   lower-precedence rule can grant them again

use std::cmp::Ordering;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

use crate::drive::utils::{clean_path, is_ancestor_or_self, path_depth};

/// Capability bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const EMPTY: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(1 << 1);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permission {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Permission {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Permission {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Who a rule applies to.
///
/// Serialized as `"anonymous"`, `{"user": "alice"}` or `{"group": "staff"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    /// Everyone, including unauthenticated callers.
    Anonymous,
    User(String),
    Group(String),
}

impl Subject {
    /// Precedence class at equal depth; lower ranks first.
    fn rank(&self) -> u8 {
        match self {
            Subject::User(_) => 0,
            Subject::Group(_) => 1,
            Subject::Anonymous => 2,
        }
    }
}

/// Whether a rule grants its bits, rejects them, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Accept,
    Reject,
    Both,
}

impl RuleMode {
    pub fn is_accept(self) -> bool {
        matches!(self, RuleMode::Accept | RuleMode::Both)
    }

    pub fn is_reject(self) -> bool {
        matches!(self, RuleMode::Reject | RuleMode::Both)
    }
}

/// One access rule scoped to a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPermission {
    /// Subtree root the rule applies to; `""` is the whole namespace.
    pub path: String,
    /// Number of segments in `path`. Recomputed whenever rules are loaded
    /// into a [`PermissionTable`].
    #[serde(default)]
    pub depth: usize,
    pub subject: Subject,
    /// Tie-break strength within a subject class; lower values first.
    #[serde(default)]
    pub policy: u8,
    pub permission: Permission,
    pub mode: RuleMode,
}

impl PathPermission {
    pub fn new(
        path: &str,
        subject: Subject,
        policy: u8,
        permission: Permission,
        mode: RuleMode,
    ) -> Self {
        let path = clean_path(path);
        Self {
            depth: path_depth(&path),
            path,
            subject,
            policy,
            permission,
            mode,
        }
    }

    pub fn is_accept(&self) -> bool {
        self.mode.is_accept()
    }

    pub fn is_reject(&self) -> bool {
        self.mode.is_reject()
    }

    fn normalized(mut self) -> Self {
        self.path = clean_path(&self.path);
        self.depth = path_depth(&self.path);
        self
    }
}

/// Total order of rules, highest precedence first.
fn precedence(a: &PathPermission, b: &PathPermission) -> Ordering {
    b.depth
        .cmp(&a.depth)
        .then_with(|| a.subject.rank().cmp(&b.subject.rank()))
        .then_with(|| a.policy.cmp(&b.policy))
}

/// Fold the applicable rules of a request into the effective permission.
///
/// The input order does not matter; an empty input yields
/// [`Permission::EMPTY`].
pub fn resolve_permissions(rules: &[PathPermission]) -> Permission {
    let mut sorted: Vec<&PathPermission> = rules.iter().collect();
    sorted.sort_by(|a, b| precedence(a, b));

    let mut accepted = Permission::EMPTY;
    let mut rejected = Permission::EMPTY;
    for rule in sorted {
        if rule.is_accept() {
            accepted |= rule.permission & !rejected;
        }
        if rule.is_reject() {
            accepted &= !rule.permission;
            rejected |= rule.permission;
        }
    }
    accepted
}

/// The configured rule store.
///
/// Selects the rules applicable to a request (ancestor-or-self path and a
/// matching subject) and resolves them.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    rules: Vec<PathPermission>,
}

impl PermissionTable {
    pub fn new(rules: Vec<PathPermission>) -> Self {
        Self {
            rules: rules.into_iter().map(PathPermission::normalized).collect(),
        }
    }

    pub fn rules(&self) -> &[PathPermission] {
        &self.rules
    }

    /// Rules whose path is an ancestor of (or equal to) `path` and whose
    /// subject is anonymous or one of `subjects`.
    pub fn applicable(&self, path: &str, subjects: &[Subject]) -> Vec<PathPermission> {
        let path = clean_path(path);
        self.rules
            .iter()
            .filter(|rule| is_ancestor_or_self(&rule.path, &path))
            .filter(|rule| rule.subject == Subject::Anonymous || subjects.contains(&rule.subject))
            .cloned()
            .collect()
    }

    pub fn resolve_for(&self, path: &str, subjects: &[Subject]) -> Permission {
        resolve_permissions(&self.applicable(path, subjects))
    }
}
