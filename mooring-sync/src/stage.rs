//! Replication stages and the layout they produce under the mount.
//!
//! ```text
//! <mount>/
//!   openclaw/     ← config_dir
//!   workspace/    ← workspace_dir, without skills/
//!   skills/       ← workspace_dir/skills
//!   .last-sync    ← completion marker
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use mooring_core::Config;

pub const MARKER_FILE: &str = ".last-sync";

/// One delete-mirroring copy pass. Stages run strictly in [`ReplicationStage::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationStage {
    Config,
    Workspace,
    Skills,
}

impl ReplicationStage {
    pub const ALL: [ReplicationStage; 3] = [
        ReplicationStage::Config,
        ReplicationStage::Workspace,
        ReplicationStage::Skills,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ReplicationStage::Config => "config",
            ReplicationStage::Workspace => "workspace",
            ReplicationStage::Skills => "skills",
        }
    }

    /// Directory name under the mount.
    pub fn remote_name(self) -> &'static str {
        match self {
            ReplicationStage::Config => "openclaw",
            ReplicationStage::Workspace => "workspace",
            ReplicationStage::Skills => "skills",
        }
    }

    pub fn source(self, config: &Config) -> PathBuf {
        match self {
            ReplicationStage::Config => config.config_dir.clone(),
            ReplicationStage::Workspace => config.workspace_dir.clone(),
            ReplicationStage::Skills => config.skills_dir(),
        }
    }

    pub fn destination(self, mount_path: &Path) -> PathBuf {
        mount_path.join(self.remote_name())
    }
}

impl fmt::Display for ReplicationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn marker_path(mount_path: &Path) -> PathBuf {
    mount_path.join(MARKER_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_map_to_fixed_remote_layout() {
        let mount = Path::new("/data/moltbot");
        let dests: Vec<PathBuf> = ReplicationStage::ALL
            .iter()
            .map(|s| s.destination(mount))
            .collect();
        assert_eq!(
            dests,
            vec![
                PathBuf::from("/data/moltbot/openclaw"),
                PathBuf::from("/data/moltbot/workspace"),
                PathBuf::from("/data/moltbot/skills"),
            ]
        );
        assert_eq!(marker_path(mount), PathBuf::from("/data/moltbot/.last-sync"));
    }

    #[test]
    fn skills_source_lives_under_workspace() {
        let config = Config::default();
        assert_eq!(
            ReplicationStage::Skills.source(&config),
            config.workspace_dir.join("skills")
        );
    }
}
