//! Command handler table
//!
//! Maps a command name (case-insensitive) to the operation that serves it,
//! along with its arity and whether it needs a file-capable transport. The
//! built-in table can be extended with [`CommandHandler`] implementations;
//! built-ins can never be removed or shadowed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::{Session, SessionResult};

/// Handler table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Command already registered: {0}")]
    Duplicate(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Number of arguments a command accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

/// Commands every server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Ls,
    Cd,
    Cp,
    Up,
    Rm,
    Rmdir,
    Dc,
    Help,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::Ls,
        Builtin::Cd,
        Builtin::Cp,
        Builtin::Up,
        Builtin::Rm,
        Builtin::Rmdir,
        Builtin::Dc,
        Builtin::Help,
    ];

    /// Look up a built-in by name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|builtin| builtin.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Ls => "ls",
            Builtin::Cd => "cd",
            Builtin::Cp => "cp",
            Builtin::Up => "up",
            Builtin::Rm => "rm",
            Builtin::Rmdir => "rmdir",
            Builtin::Dc => "dc",
            Builtin::Help => "help",
        }
    }

    fn usage(&self) -> &'static str {
        match self {
            Builtin::Ls => "ls",
            Builtin::Cd => "cd <target>",
            Builtin::Cp => "cp <target> [...]",
            Builtin::Up => "up <path> [...]",
            Builtin::Rm => "rm <target|*>",
            Builtin::Rmdir => "rmdir <target>",
            Builtin::Dc => "dc",
            Builtin::Help => "help",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Builtin::Ls => "List all files in current directory.",
            Builtin::Cd => "Move to target directory.",
            Builtin::Cp => "Download files or directories from the server.",
            Builtin::Up => "Upload a file or directory to the server.",
            Builtin::Rm => "Delete target file, or everything with *.",
            Builtin::Rmdir => "Delete target directory.",
            Builtin::Dc => "Disconnect from server.",
            Builtin::Help => "Display this help message.",
        }
    }

    fn arity(&self) -> Arity {
        match self {
            Builtin::Cd | Builtin::Rm | Builtin::Rmdir => Arity::Exact(1),
            Builtin::Cp => Arity::AtLeast(1),
            // The paths of an upload stay on the client side.
            Builtin::Up => Arity::AtLeast(0),
            Builtin::Ls | Builtin::Dc | Builtin::Help => Arity::Exact(0),
        }
    }

    /// Touches the shared tree, so only served over stream transports
    pub fn file_operation(&self) -> bool {
        matches!(
            self,
            Builtin::Ls | Builtin::Cd | Builtin::Cp | Builtin::Up | Builtin::Rm | Builtin::Rmdir
        )
    }
}

/// An extra command served alongside the built-ins
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command name, matched case-insensitively
    fn name(&self) -> &str;

    /// Argument shape shown by `help`
    fn usage(&self) -> &str {
        self.name()
    }

    /// One-line summary shown by `help`
    fn description(&self) -> &str;

    fn arity(&self) -> Arity {
        Arity::Exact(0)
    }

    /// Whether the command moves files and so needs a stream transport
    fn file_operation(&self) -> bool {
        false
    }

    /// Serve one invocation; arity has already been checked
    async fn handle(&self, session: &mut Session, args: &[String]) -> SessionResult<()>;
}

/// What a table entry runs
#[derive(Clone)]
pub enum Action {
    Builtin(Builtin),
    Extension(Arc<dyn CommandHandler>),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Builtin(builtin) => f.debug_tuple("Builtin").field(builtin).finish(),
            Action::Extension(handler) => f.debug_tuple("Extension").field(&handler.name()).finish(),
        }
    }
}

/// One command in the table
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    name: String,
    usage: String,
    description: String,
    arity: Arity,
    file_operation: bool,
    action: Action,
}

impl HandlerEntry {
    fn from_builtin(builtin: Builtin) -> Self {
        Self {
            name: builtin.name().to_string(),
            usage: builtin.usage().to_string(),
            description: builtin.description().to_string(),
            arity: builtin.arity(),
            file_operation: builtin.file_operation(),
            action: Action::Builtin(builtin),
        }
    }

    fn from_handler(handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            name: handler.name().to_string(),
            usage: handler.usage().to_string(),
            description: handler.description().to_string(),
            arity: handler.arity(),
            file_operation: handler.file_operation(),
            action: Action::Extension(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn file_operation(&self) -> bool {
        self.file_operation
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

/// Command name to handler mapping
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    entries: Vec<HandlerEntry>,
}

impl HandlerTable {
    /// An empty table, for collecting extensions
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in command set
    pub fn builtin() -> Self {
        Self {
            entries: Builtin::ALL.iter().copied().map(HandlerEntry::from_builtin).collect(),
        }
    }

    fn insert(&mut self, entry: HandlerEntry) -> RegistryResult<()> {
        if self.lookup(&entry.name).is_some() {
            return Err(RegistryError::Duplicate(entry.name));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Add an extension command
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> RegistryResult<()> {
        self.insert(HandlerEntry::from_handler(handler))
    }

    /// Add every entry of `other`, failing on the first name clash
    pub fn merge(mut self, other: HandlerTable) -> RegistryResult<Self> {
        for entry in other.entries {
            self.insert(entry)?;
        }
        Ok(self)
    }

    /// Find a command by name, ignoring case
    pub fn lookup(&self, name: &str) -> Option<&HandlerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Formatted summary of every command
    pub fn help_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{:<20}\t- {}\n", entry.usage, entry.description))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn usage(&self) -> &str {
            "echo <text> [...]"
        }

        fn description(&self) -> &str {
            "Repeat the arguments."
        }

        fn arity(&self) -> Arity {
            Arity::AtLeast(1)
        }

        async fn handle(&self, session: &mut Session, args: &[String]) -> SessionResult<()> {
            session.reply(&args.join(" ")).await
        }
    }

    struct Shadow;

    #[async_trait]
    impl CommandHandler for Shadow {
        fn name(&self) -> &str {
            "LS"
        }

        fn description(&self) -> &str {
            "Not allowed."
        }

        async fn handle(&self, _session: &mut Session, _args: &[String]) -> SessionResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_arity() {
        assert!(Arity::Exact(1).accepts(1));
        assert!(!Arity::Exact(1).accepts(0));
        assert!(!Arity::Exact(1).accepts(2));
        assert!(Arity::AtLeast(1).accepts(3));
        assert!(!Arity::AtLeast(1).accepts(0));
    }

    #[test]
    fn test_builtin_lookup_ignores_case() {
        let table = HandlerTable::builtin();
        assert_eq!(table.len(), Builtin::ALL.len());

        let entry = table.lookup("RmDir").unwrap();
        assert_eq!(entry.name(), "rmdir");
        assert_eq!(entry.arity(), Arity::Exact(1));
        assert!(table.lookup("format").is_none());
    }

    #[test]
    fn test_filesystem_commands_need_file_transport() {
        let table = HandlerTable::builtin();
        let file_ops: Vec<&str> = Builtin::ALL
            .iter()
            .filter(|b| table.lookup(b.name()).unwrap().file_operation())
            .map(|b| b.name())
            .collect();
        assert_eq!(file_ops, ["ls", "cd", "cp", "up", "rm", "rmdir"]);
    }

    #[test]
    fn test_builtin_from_name() {
        assert_eq!(Builtin::from_name("RMDIR"), Some(Builtin::Rmdir));
        assert_eq!(Builtin::from_name("help"), Some(Builtin::Help));
        assert_eq!(Builtin::from_name("format"), None);
    }

    #[test]
    fn test_merge_extension() {
        let mut extra = HandlerTable::new();
        extra.register(Arc::new(Echo)).unwrap();

        let table = HandlerTable::builtin().merge(extra).unwrap();
        let entry = table.lookup("ECHO").unwrap();
        assert!(matches!(entry.action(), Action::Extension(_)));
        assert!(table.help_text().contains("echo <text> [...]"));
    }

    #[test]
    fn test_merge_rejects_builtin_clash() {
        let mut extra = HandlerTable::new();
        extra.register(Arc::new(Shadow)).unwrap();

        assert_eq!(
            HandlerTable::builtin().merge(extra).unwrap_err(),
            RegistryError::Duplicate("LS".to_string())
        );
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut table = HandlerTable::new();
        table.register(Arc::new(Echo)).unwrap();
        assert!(table.register(Arc::new(Echo)).is_err());
    }

    #[test]
    fn test_help_layout() {
        let help = HandlerTable::builtin().help_text();
        let first = help.lines().next().unwrap();
        assert_eq!(first, format!("{:<20}\t- {}", "ls", "List all files in current directory."));
        assert_eq!(help.lines().count(), Builtin::ALL.len());
    }
}
