use std::fmt;

use crate::{
    error::{Error, Result},
    protocol::CloseCode,
};

use super::{EndReason, SessionHandle};

/// Identifies one field of one device: the moniker names the device, the
/// field name the value within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldId {
    /// Device moniker.
    pub moniker: String,
    /// Field name within the device.
    pub field: String,
}

impl FieldId {
    /// Create a field id.
    pub fn new(moniker: impl Into<String>, field: impl Into<String>) -> Self {
        FieldId { moniker: moniker.into(), field: field.into() }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.moniker, self.field)
    }
}

/// A field value as last read from the data source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldReading {
    /// Whether the source currently has a good value for the field.
    pub valid: bool,
    /// The value formatted as text.
    pub value: String,
}

impl FieldReading {
    /// A good value.
    pub fn valid(value: impl Into<String>) -> Self {
        FieldReading { valid: true, value: value.into() }
    }

    /// No good value available.
    pub fn invalid() -> Self {
        FieldReading::default()
    }
}

/// Source of current field values, polled on every idle tick.
///
/// Never pushed to; the session compares readings against the last ones it saw.
pub trait FieldSource: Send + Sync {
    /// Read the current value of a field. A field the source does not know
    /// is reported as an invalid reading.
    fn read_field(&self, id: &FieldId) -> FieldReading;
}

impl<F> FieldSource for F
where
    F: Fn(&FieldId) -> FieldReading + Send + Sync,
{
    fn read_field(&self, id: &FieldId) -> FieldReading {
        self(id)
    }
}

/// Per-application logic driven by a session.
///
/// Every method is called synchronously on the session's worker thread. The
/// [`SessionHandle`] passed in is the same one producers on other threads use,
/// so replies are queued with [`SessionHandle::queue_text_msg`].
pub trait SessionHandler: Send {
    /// Called once after the upgrade response has been sent.
    ///
    /// Returns the fields to watch for changes. An error aborts the session.
    fn initialize(&mut self, session: &SessionHandle) -> Result<Vec<FieldId>>;

    /// A complete text message arrived.
    fn process_msg(&mut self, session: &SessionHandle, text: &str) -> Result<()>;

    /// A complete binary message arrived.
    ///
    /// By default the payload is decoded as UTF-8 and handed to [`Self::process_msg`].
    fn process_binary(&mut self, session: &SessionHandle, data: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(data).map_err(Error::from)?;
        self.process_msg(session, text)
    }

    /// A watched field changed its value or validity.
    fn field_changed(
        &mut self,
        _session: &SessionHandle,
        _id: &FieldId,
        _reading: &FieldReading,
    ) -> Result<()> {
        Ok(())
    }

    /// Periodic tick, for pushing proactive updates.
    fn idle(&mut self, _session: &SessionHandle) -> Result<()> {
        Ok(())
    }

    /// Polled once per loop iteration; returning a code starts the close handshake.
    fn check_shutdown_request(&mut self) -> Option<CloseCode> {
        None
    }

    /// The session ended. Called exactly once, after the connection was released.
    fn disconnected(&mut self, _reason: &EndReason) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_field_sources() {
        let source = |id: &FieldId| {
            if id.field == "Temp" {
                FieldReading::valid("21.5")
            } else {
                FieldReading::invalid()
            }
        };
        assert_eq!(source.read_field(&FieldId::new("Thermo", "Temp")).value, "21.5");
        assert!(!source.read_field(&FieldId::new("Thermo", "Mode")).valid);
        assert_eq!(FieldId::new("Thermo", "Temp").to_string(), "Thermo.Temp");
    }
}
