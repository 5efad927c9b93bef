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

use std::env;
use thiserror::Error;

/// Failure to interpret an environment variable that is present.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment variable {key} is not valid unicode")]
    NotUnicode { key: String },

    #[error("environment variable {key} has invalid value '{value}': expected {expected}")]
    Invalid { key: String, value: String, expected: &'static str },
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn get_env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn get_env_opt_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

pub fn get_env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn get_env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|v| parse_bool(&v)).unwrap_or(default)
}

/// Strict boolean read: `Ok(None)` when unset, an error when set to something unparsable.
pub fn try_get_env_bool(key: &str) -> Result<Option<bool>, EnvError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v).map(Some).ok_or(EnvError::Invalid {
            key: key.to_string(),
            value: v,
            expected: "a boolean",
        }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(EnvError::NotUnicode { key: key.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEY: &str = "REPOKEEPER_TEST_ENVS_KEY";

    #[test]
    #[serial]
    fn test_get_env_bool_variants() {
        temp_env::with_var(KEY, Some("YES"), || assert!(get_env_bool(KEY, false)));
        temp_env::with_var(KEY, Some("0"), || assert!(!get_env_bool(KEY, true)));
        temp_env::with_var(KEY, Some("maybe"), || assert!(get_env_bool(KEY, true)));
        temp_env::with_var_unset(KEY, || assert!(!get_env_bool(KEY, false)));
    }

    #[test]
    #[serial]
    fn test_try_get_env_bool() {
        temp_env::with_var_unset(KEY, || assert_eq!(try_get_env_bool(KEY), Ok(None)));
        temp_env::with_var(KEY, Some(" true "), || assert_eq!(try_get_env_bool(KEY), Ok(Some(true))));
        temp_env::with_var(KEY, Some("sometimes"), || {
            assert!(matches!(try_get_env_bool(KEY), Err(EnvError::Invalid { .. })));
        });
    }

    #[test]
    #[serial]
    fn test_numeric_readers_fall_back_on_garbage() {
        temp_env::with_var(KEY, Some("42"), || {
            assert_eq!(get_env_u64(KEY, 7), 42);
            assert_eq!(get_env_usize(KEY, 7), 42);
        });
        temp_env::with_var(KEY, Some("forty-two"), || {
            assert_eq!(get_env_u64(KEY, 7), 7);
            assert_eq!(get_env_usize(KEY, 7), 7);
        });
    }

    #[test]
    #[serial]
    fn test_string_readers() {
        temp_env::with_var(KEY, Some("node-b"), || {
            assert_eq!(get_env_str(KEY, "local"), "node-b");
            assert_eq!(get_env_opt_str(KEY).as_deref(), Some("node-b"));
        });
        temp_env::with_var_unset(KEY, || {
            assert_eq!(get_env_str(KEY, "local"), "local");
            assert!(get_env_opt_str(KEY).is_none());
        });
    }
}
