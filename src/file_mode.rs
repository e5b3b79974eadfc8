//! Git file modes for converted worktree entries.

/// The file type recorded in a tree entry.
///
/// Git uses a variation on the Unix permission flags. Converted VSS files
/// are normal files unless a `<Chmod>` rule says otherwise:
///
/// * `100644` - normal file
/// * `100755` - executable file
/// * `120000` - symbolic link
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileMode {
    Normal,
    Executable,
    SymbolicLink,
}

impl FileMode {
    /// Parse a `<Chmod Mode="...">` value. Accepts the full octal constant
    /// or the short permission form (`644`, `755`).
    pub fn from_mode_text(text: &str) -> Option<FileMode> {
        match text.trim_start_matches('0') {
            "644" | "100644" => Some(FileMode::Normal),
            "755" | "100755" => Some(FileMode::Executable),
            "120000" => Some(FileMode::SymbolicLink),
            _ => None,
        }
    }

    /// The octal digits used in `update-index --index-info` lines.
    pub fn index_text(self) -> &'static str {
        match self {
            FileMode::Normal => "100644",
            FileMode::Executable => "100755",
            FileMode::SymbolicLink => "120000",
        }
    }

    pub fn to_value(self) -> u32 {
        match self {
            FileMode::Normal => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::SymbolicLink => 0o120000,
        }
    }
}

impl Default for FileMode {
    fn default() -> FileMode {
        FileMode::Normal
    }
}
