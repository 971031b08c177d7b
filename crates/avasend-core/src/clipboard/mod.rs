//! Clipboard access.
//!
//! Clipboard text travels as its own frame kind on both transports. The
//! sending side reads it through a [`ClipboardAccess`] implementation and a
//! server can write received text back into one.
//!
//! [`NativeClipboard`] talks to the system clipboard through `arboard` and
//! is only compiled with the `clipboard` feature. [`MemoryClipboard`] keeps
//! the text in memory.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Platform-agnostic clipboard access trait.
pub trait ClipboardAccess: Send {
    /// Read the current clipboard text.
    ///
    /// # Errors
    ///
    /// Returns an error if clipboard access fails.
    fn read_text(&mut self) -> Result<String>;

    /// Replace the clipboard text.
    ///
    /// # Errors
    ///
    /// Returns an error if clipboard access fails.
    fn write_text(&mut self, text: &str) -> Result<()>;
}

/// A clipboard shared between the application and a server.
pub type SharedClipboard = Arc<Mutex<dyn ClipboardAccess>>;

/// Wrap a clipboard so it can be handed to a server.
pub fn shared<C: ClipboardAccess + 'static>(clipboard: C) -> SharedClipboard {
    Arc::new(Mutex::new(clipboard))
}

/// Read text from a shared clipboard.
pub fn read_shared(clipboard: &SharedClipboard) -> Result<String> {
    clipboard
        .lock()
        .map_err(|_| Error::ClipboardError("clipboard lock poisoned".to_string()))?
        .read_text()
}

/// Write text into a shared clipboard.
pub fn write_shared(clipboard: &SharedClipboard, text: &str) -> Result<()> {
    clipboard
        .lock()
        .map_err(|_| Error::ClipboardError("clipboard lock poisoned".to_string()))?
        .write_text(text)
}

/// In-process clipboard.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    text: Option<String>,
}

impl MemoryClipboard {
    /// Create a clipboard holding `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// Current contents, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

impl ClipboardAccess for MemoryClipboard {
    fn read_text(&mut self) -> Result<String> {
        self.text
            .clone()
            .ok_or_else(|| Error::ClipboardError("clipboard is empty".to_string()))
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.text = Some(text.to_string());
        Ok(())
    }
}

#[cfg(feature = "clipboard")]
pub use native::NativeClipboard;

#[cfg(feature = "clipboard")]
mod native {
    use arboard::Clipboard;

    use super::ClipboardAccess;
    use crate::error::{Error, Result};

    /// Native clipboard implementation using arboard.
    pub struct NativeClipboard {
        clipboard: Clipboard,
    }

    impl std::fmt::Debug for NativeClipboard {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("NativeClipboard").finish_non_exhaustive()
        }
    }

    impl NativeClipboard {
        /// Create a new native clipboard accessor.
        ///
        /// # Errors
        ///
        /// Returns an error if clipboard cannot be accessed.
        pub fn new() -> Result<Self> {
            let clipboard = Clipboard::new()
                .map_err(|e| Error::ClipboardError(format!("failed to access clipboard: {e}")))?;
            Ok(Self { clipboard })
        }
    }

    impl ClipboardAccess for NativeClipboard {
        fn read_text(&mut self) -> Result<String> {
            let text = self
                .clipboard
                .get_text()
                .map_err(|e| Error::ClipboardError(format!("failed to read text: {e}")))?;
            tracing::trace!("Clipboard: read {} bytes of text", text.len());
            Ok(text)
        }

        fn write_text(&mut self, text: &str) -> Result<()> {
            self.clipboard
                .set_text(text.to_string())
                .map_err(|e| Error::ClipboardError(format!("failed to set text: {e}")))
        }
    }
}
