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

//! Fixed table of the queues the service can create.

/// A named queue and the callbacks that feed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKind {
    /// Upper snake case id, used in the worker count variable
    pub id: &'static str,
    /// Queue name shown by monitoring
    pub display_name: &'static str,
    pub default_workers: usize,
    /// Callback names served by this queue
    pub callbacks: &'static [&'static str],
}

pub const QUEUE_KINDS: &[QueueKind] = &[
    QueueKind {
        id: "MAVEN_METADATA",
        display_name: "Maven Metadata",
        default_workers: 8,
        callbacks: &["calculate_maven_metadata_async"],
    },
    QueueKind {
        id: "MAVEN_PLUGIN_METADATA",
        display_name: "Plugin Maven Metadata",
        default_workers: 2,
        callbacks: &["calculate_maven_plugins_metadata_async"],
    },
    QueueKind {
        id: "YUM_VIRTUAL_METADATA",
        display_name: "Yum Virtual Metadata",
        default_workers: 5,
        callbacks: &["calculate_yum_virtual_metadata_async", "calculate_yum_virtual_metadata"],
    },
    QueueKind {
        id: "RPM_METADATA",
        display_name: "Rpm Metadata",
        default_workers: 8,
        callbacks: &["calculate_rpm_metadata_async", "calculate_rpm_metadata_sync"],
    },
    QueueKind {
        id: "HELM_METADATA",
        display_name: "Helm Metadata",
        default_workers: 2,
        callbacks: &["calculate_helm_metadata_async", "calculate_helm_metadata_sync"],
    },
    QueueKind {
        id: "HELM_VIRTUAL_URL_METADATA",
        display_name: "Helm Virtual Url Metadata",
        default_workers: 2,
        callbacks: &["calculate_virtual_url_helm_metadata_async", "calculate_virtual_url_helm_metadata_sync"],
    },
    QueueKind {
        id: "COMPOSER_EXTRACTION",
        display_name: "Composer Metadata Extraction",
        default_workers: 20,
        callbacks: &["handle_package_deployment", "handle_package_deletion"],
    },
    QueueKind {
        id: "COMPOSER_METADATA",
        display_name: "Composer Metadata",
        default_workers: 10,
        callbacks: &["extract_and_index_all_composer_packages", "index_composer_package_and_repo"],
    },
    QueueKind {
        id: "DEBIAN_METADATA",
        display_name: "Debian Metadata",
        default_workers: 8,
        callbacks: &["calculate_debian_metadata_internal_async", "calculate_debian_metadata_internal_sync"],
    },
    QueueKind {
        id: "PUPPET_METADATA",
        display_name: "Puppet Metadata",
        default_workers: 5,
        callbacks: &["calculate_puppet_metadata_async"],
    },
    QueueKind {
        id: "PUPPET_REPO_METADATA",
        display_name: "Puppet Repository Metadata",
        default_workers: 5,
        callbacks: &["calculate_puppet_repo_metadata_async"],
    },
    QueueKind {
        id: "CHEF_METADATA",
        display_name: "Chef Metadata",
        default_workers: 10,
        callbacks: &[
            "extract_and_index_chef_cookbooks",
            "extract_and_index_single_chef_cookbook",
            "calculate_virtual_repo_metadata",
        ],
    },
    QueueKind {
        id: "EVENT_BASED_REPLICATION",
        display_name: "Event Based Replication",
        default_workers: 8,
        callbacks: &["offer_remote_replication_event_internal", "put_inbound_replication_events_internal"],
    },
    QueueKind {
        id: "BUILD_RETENTION",
        display_name: "Build Retention Job",
        default_workers: 10,
        callbacks: &["delete_build_async"],
    },
    QueueKind {
        id: "SHA256_MIGRATION",
        display_name: "SHA256 Migration",
        default_workers: 2,
        callbacks: &["update_sha2"],
    },
    QueueKind {
        id: "PATH_CHECKSUM_MIGRATION",
        display_name: "Path Checksum Migration",
        default_workers: 2,
        callbacks: &["update_repo_path_checksum"],
    },
    QueueKind {
        id: "HA_MESSAGES",
        display_name: "HA event messages",
        default_workers: 10,
        callbacks: &["notify_async"],
    },
];

impl QueueKind {
    /// Kind serving the callback `name`
    pub fn for_callback(name: &str) -> Option<&'static QueueKind> {
        QUEUE_KINDS.iter().find(|kind| kind.callbacks.contains(&name))
    }

    /// Kind with the given display name
    pub fn by_display_name(name: &str) -> Option<&'static QueueKind> {
        QUEUE_KINDS.iter().find(|kind| kind.display_name == name)
    }

    pub fn by_id(id: &str) -> Option<&'static QueueKind> {
        QUEUE_KINDS.iter().find(|kind| kind.id.eq_ignore_ascii_case(id))
    }
}
