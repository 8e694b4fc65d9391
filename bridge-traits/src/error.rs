use thiserror::Error;

/// Categorised failures reported by the collaborators behind the bridge
/// traits (remote repository client, local filesystem).
///
/// The sync core decides what to do with a failed operation by looking at
/// the category alone, so implementations must map their native errors onto
/// the closest variant instead of collapsing everything into
/// `OperationFailed`.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The object does not exist (or no longer exists).
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A create or rename collided with an existing name or violated a
    /// naming constraint.
    #[error("Name constraint violated: {0}")]
    NameConstraint(String),

    /// The document is checked out by another user and cannot be updated.
    #[error("Document is checked out: {0}")]
    CheckedOut(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            BridgeError::NotFound(_) => true,
            BridgeError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            BridgeError::PermissionDenied(_) => true,
            BridgeError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    pub fn is_name_constraint(&self) -> bool {
        matches!(self, BridgeError::NameConstraint(_))
    }

    pub fn is_checked_out(&self) -> bool {
        matches!(self, BridgeError::CheckedOut(_))
    }

    /// Connection and I/O failures that are expected to clear up on their
    /// own by the next pass.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Connection(_) => true,
            BridgeError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_categories() {
        let missing = BridgeError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());

        let denied = BridgeError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(denied.is_permission_denied());

        let broken = BridgeError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(broken.is_transient());
    }

    #[test]
    fn remote_categories() {
        assert!(BridgeError::NotFound("x".into()).is_not_found());
        assert!(BridgeError::CheckedOut("x".into()).is_checked_out());
        assert!(BridgeError::NameConstraint("x".into()).is_name_constraint());
        assert!(BridgeError::Connection("reset".into()).is_transient());
        assert!(!BridgeError::OperationFailed("x".into()).is_transient());
    }
}
