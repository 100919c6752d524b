//! Sentinel vocabulary: the wire contract between the orchestrator and the
//! shell probes it runs.
//!
//! A probe prints exactly one token, alone on a line, on stdout. The set is
//! closed; adding a token means bumping [`SENTINEL_VERSION`] and teaching
//! both [`Sentinel::find_in`] and the command builders in
//! [`crate::commands`] about it.

pub const SENTINEL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Pre-flight passed.
    Ok,
    /// The critical source file is missing.
    Missing,
    /// Remote workspace has content, local workspace has none.
    WorkspaceEmpty,
    /// `stat -f` could not describe the mount path.
    NoFilesystem,
}

impl Sentinel {
    pub const ALL: [Sentinel; 4] = [
        Sentinel::Ok,
        Sentinel::Missing,
        Sentinel::WorkspaceEmpty,
        Sentinel::NoFilesystem,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Sentinel::Ok => "__OK__",
            Sentinel::Missing => "__MISSING__",
            Sentinel::WorkspaceEmpty => "__WORKSPACE_EMPTY__",
            Sentinel::NoFilesystem => "__NO_FS__",
        }
    }

    /// First line of `output` that is exactly a known token.
    pub fn find_in(output: &str) -> Option<Sentinel> {
        output.lines().map(str::trim).find_map(|line| {
            Sentinel::ALL
                .into_iter()
                .find(|sentinel| sentinel.token() == line)
        })
    }
}
