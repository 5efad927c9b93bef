// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of the execution context that holds a lock.
///
/// Locks are reentrant per owner rather than per task: two guards created with the same
/// owner are treated as the same holder, guards with different owners contend. Clone the
/// owner into every call made on behalf of one logical unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockOwner(Arc<str>);

impl LockOwner {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Fresh owner with a random identity.
    pub fn unique() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Fresh owner prefixed with a node identifier, e.g. `node-a:5f0c...`.
    pub fn scoped(node_id: &str) -> Self {
        Self::new(format!("{}:{}", node_id, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockOwner {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Resource key shared by the cluster and versioned stores ("category:key").
pub(crate) fn resource_key(category: &str, key: &str) -> String {
    format!("{category}:{key}")
}

/// Location of a file or folder inside a repository.
///
/// The path is stored normalized: no leading or trailing separators, no empty or `.`
/// segments, and `..` segments resolved. The repository root has an empty path.
/// Ordering is lexicographic on `(repo_key, path)`, which places every ancestor before its
/// descendants and gives batch acquisition a canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoPath {
    repo_key: String,
    path: String,
}

impl RepoPath {
    pub fn new(repo_key: impl Into<String>, path: &str) -> Self {
        Self {
            repo_key: repo_key.into(),
            path: normalize(path),
        }
    }

    pub fn root(repo_key: impl Into<String>) -> Self {
        Self {
            repo_key: repo_key.into(),
            path: String::new(),
        }
    }

    /// Parse `repo/some/path`. Returns `None` when no repository key is present.
    pub fn parse(full_path: &str) -> Option<Self> {
        let trimmed = full_path.trim_start_matches('/');
        let (repo_key, rest) = match trimmed.split_once('/') {
            Some((repo, rest)) => (repo, rest),
            None => (trimmed, ""),
        };
        if repo_key.is_empty() {
            return None;
        }
        Some(Self::new(repo_key, rest))
    }

    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Last path segment, empty for the repository root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Full textual form used as a lock key: `repo/path`, or `repo/` for the root.
    pub fn to_path(&self) -> String {
        format!("{}/{}", self.repo_key, self.path)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind('/') {
            Some(idx) => self.path[..idx].to_string(),
            None => String::new(),
        };
        Some(Self {
            repo_key: self.repo_key.clone(),
            path: parent,
        })
    }

    pub fn child(&self, name: &str) -> Self {
        let joined = if self.is_root() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        };
        Self::new(self.repo_key.clone(), &joined)
    }

    /// Ancestors from the direct parent up to the repository root.
    pub fn ancestors(&self) -> impl Iterator<Item = RepoPath> {
        std::iter::successors(self.parent(), |p| p.parent())
    }

    pub fn is_ancestor_of(&self, other: &RepoPath) -> bool {
        if self.repo_key != other.repo_key || self.path.len() >= other.path.len() {
            return false;
        }
        self.is_root() || (other.path.starts_with(&self.path) && other.path.as_bytes()[self.path.len()] == b'/')
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_key, self.path)
    }
}

fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
