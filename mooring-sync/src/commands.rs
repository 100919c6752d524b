//! Shell commands handed to the process supervisor.
//!
//! Every path is single-quoted through [`shell_quote`]. Probes that report
//! through stdout emit tokens from [`crate::sentinel`].

use std::path::Path;

use mooring_core::Config;

use crate::sentinel::Sentinel;
use crate::stage::{marker_path, ReplicationStage};

/// Copy tool name; also what the dedup check looks for in live commands.
pub const COPY_TOOL: &str = "rsync";

/// Lazy unmount variants, tried in order during stale-mount recovery.
pub const UNMOUNT_VARIANTS: [&str; 3] = ["umount -l", "fusermount -uz", "fusermount3 -uz"];

const RSYNC_BASE: &str = "rsync -r --no-times --delete";

/// Quote `path` for POSIX `sh`.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Filesystem type backing `mount_path`, or the no-filesystem sentinel.
pub fn fs_type_probe(mount_path: &Path) -> String {
    format!(
        "stat -f -c %T {} 2>/dev/null || echo {}",
        shell_quote(mount_path),
        Sentinel::NoFilesystem.token()
    )
}

pub fn unmount(variant: &str, mount_path: &Path) -> String {
    format!("{variant} {}", shell_quote(mount_path))
}

/// One batched pre-flight probe: critical file present, and the local
/// workspace not empty while the remote one has content.
///
/// `skills/` is ignored on the local side because the workspace stage
/// excludes it.
pub fn preflight(config: &Config) -> String {
    let critical = shell_quote(&config.config_dir.join(&config.critical_file));
    let remote_workspace = shell_quote(&ReplicationStage::Workspace.destination(&config.mount_path));
    let local_workspace = shell_quote(&config.workspace_dir);
    format!(
        "if [ ! -f {critical} ]; then echo {missing}; \
         elif [ -n \"$(ls -A {remote_workspace} 2>/dev/null)\" ] && \
         [ -z \"$(ls -A {local_workspace} 2>/dev/null | grep -v '^skills$')\" ]; then echo {empty}; \
         else echo {ok}; fi",
        missing = Sentinel::Missing.token(),
        empty = Sentinel::WorkspaceEmpty.token(),
        ok = Sentinel::Ok.token(),
    )
}

/// Delete-mirroring copy for one stage.
pub fn replicate(stage: ReplicationStage, config: &Config) -> String {
    let source = format!("{}/", shell_quote(&stage.source(config)));
    let destination = format!("{}/", shell_quote(&stage.destination(&config.mount_path)));
    match stage {
        ReplicationStage::Config => format!(
            "{RSYNC_BASE} --exclude='*.lock' --exclude='*.log' --exclude='*.tmp' {source} {destination}"
        ),
        ReplicationStage::Workspace => {
            format!("{RSYNC_BASE} --exclude='/skills' {source} {destination}")
        }
        // A workspace without skills is normal; skip rather than fail.
        ReplicationStage::Skills => format!(
            "[ ! -d {} ] || {RSYNC_BASE} {source} {destination}",
            shell_quote(&stage.source(config))
        ),
    }
}

/// Whether `command` is a copy whose arguments reach into `mount_path`.
///
/// A path argument counts only when it is the mount itself or lies below
/// it, so sibling directories such as `<mount>-old` never match.
pub fn copies_into_mount(command: &str, mount_path: &Path) -> bool {
    if !command.contains(COPY_TOOL) {
        return false;
    }
    let mount = mount_path.to_string_lossy();
    let mount = mount.trim_end_matches('/');
    if mount.is_empty() {
        return false;
    }
    command.match_indices(mount).any(|(at, _)| {
        let before = command[..at].chars().next_back();
        let after = command[at + mount.len()..].chars().next();
        let opens = matches!(before, None | Some('\'' | '"' | '=' | ' ' | '\t'));
        let closes = matches!(after, None | Some('/' | '\'' | '"' | ' ' | '\t'));
        opens && closes
    })
}

pub fn write_marker(mount_path: &Path) -> String {
    format!("date -Iseconds > {}", shell_quote(&marker_path(mount_path)))
}

pub fn read_marker(mount_path: &Path) -> String {
    format!("cat {} 2>/dev/null", shell_quote(&marker_path(mount_path)))
}

/// Mount-table grep plus listings of source and destination trees.
pub fn diagnostics(config: &Config) -> String {
    let mount = &config.mount_path;
    let sections = [
        mount.to_path_buf(),
        ReplicationStage::Config.destination(mount),
        ReplicationStage::Workspace.destination(mount),
        config.config_dir.clone(),
        config.workspace_dir.clone(),
    ];
    let mut script = String::from("echo '--- mounts'; mount | grep -E 's3fs|fuse'");
    for dir in sections {
        let quoted = shell_quote(&dir);
        script.push_str(&format!("; echo '--- ' {quoted}; ls -la {quoted} 2>&1 | head -n 50"));
    }
    script
}
