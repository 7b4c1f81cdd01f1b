//! Handling of "soft errors" during an upload run

/// Encapsulates a list of "soft error"s
///
/// A "soft error" is an error encountered while processing one crash artifact that does not stop
/// the upload run. A failed symbol submission, a presubmit that could not reach the server or a
/// dump that could not be deleted all end up here, and the run moves on to the next artifact.
///
/// The list is logged once when the run finishes and then handed back to the caller inside the
/// [`RunReport`](crate::upload::RunReport).
#[must_use]
pub struct SoftErrorList<E> {
    errors: Vec<E>,
}

impl<E> SoftErrorList<E> {
    /// Returns `Some(Self)` if the list contains at least one soft error
    pub fn some(self) -> Option<Self> {
        if !self.is_empty() { Some(self) } else { None }
    }
    /// Returns `true` if the list is empty
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
    /// The number of soft errors collected
    pub fn len(&self) -> usize {
        self.errors.len()
    }
    /// Add a soft error to the list
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }
}

impl<E> Default for SoftErrorList<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E: std::error::Error> SoftErrorList<E> {
    // Helper function for the Debug and Display traits
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>, write_sources: bool) -> std::fmt::Result {
        writeln!(f, "{} artifact error(s) during the upload run:", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            writeln!(f, "  {i}: {e}")?;

            if write_sources {
                let mut source = e.source();
                while let Some(e) = source {
                    writeln!(f, "     caused by: {e}")?;
                    source = e.source();
                }
            }
        }
        Ok(())
    }
}

impl<E: std::error::Error> std::fmt::Debug for SoftErrorList<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt(f, true)
    }
}

impl<E: std::error::Error> std::fmt::Display for SoftErrorList<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt(f, false)
    }
}

impl<E: std::error::Error> std::error::Error for SoftErrorList<E> {}
