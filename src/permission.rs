use anyhow::Result;

/// Runtime permission checks for camera and storage access.
pub trait PermissionGate {
    fn is_granted(&self) -> Result<bool>;

    /// Shows the system prompt. The answer is observed through `is_granted`.
    fn request(&self) -> Result<()>;
}

/// Desktop targets have no runtime permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn is_granted(&self) -> Result<bool> {
        Ok(true)
    }

    fn request(&self) -> Result<()> {
        Ok(())
    }
}
