/// Coarse classification shared by every ingress surface when deciding how to
/// report an error: HTTP status, Slack reply, CLI exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Config,
    TransientExternal,
    SubprocessFailure,
    Store,
    Decrypt,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Config => "config",
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::SubprocessFailure => "subprocess_failure",
            ErrorKind::Store => "store",
            ErrorKind::Decrypt => "decrypt",
        }
    }

    /// Errors the user can fix by changing the request or their setup.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::Config | ErrorKind::Decrypt
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
