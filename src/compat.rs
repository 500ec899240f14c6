//! Slave-address keyword compatibility
//!
//! Modbus master stacks have named the per-call device address `slave`,
//! `device_id` and `unit` over the years. A session declares which of these
//! names each of its calls accepts, and the client binds the caller's slave
//! address to the first supported name in [`SlaveParam::PREFERENCE`]. When a
//! call accepts none of them the address is left unbound and the session
//! falls back to its default unit id.
//!
//! The TCP session in this crate always declares [`SlaveParam::Unit`], the
//! MBAP header field name.

use std::fmt;

use crate::protocol::SlaveId;

/// A historically used name for the device address parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaveParam {
    Slave,
    DeviceId,
    Unit,
}

impl SlaveParam {
    /// Lookup order when a call accepts several names
    pub const PREFERENCE: [SlaveParam; 3] = [SlaveParam::Slave, SlaveParam::DeviceId, SlaveParam::Unit];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Slave => "slave",
            Self::DeviceId => "device_id",
            Self::Unit => "unit",
        }
    }

    /// Bind `slave` against the names a call accepts
    pub fn resolve(accepted: &[SlaveParam], slave: SlaveId) -> SlaveBinding {
        Self::PREFERENCE
            .iter()
            .copied()
            .find(|param| accepted.contains(param))
            .map(|param| SlaveBinding::Keyword { param, slave })
            .unwrap_or(SlaveBinding::Omitted)
    }
}

impl fmt::Display for SlaveParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// How the slave address is passed to one session call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveBinding {
    /// Passed under the named parameter
    Keyword { param: SlaveParam, slave: SlaveId },
    /// Not passed; the session's default applies
    Omitted,
}

impl SlaveBinding {
    /// Unit id that ends up on the wire
    pub fn unit_id(&self, default_unit: SlaveId) -> SlaveId {
        match *self {
            Self::Keyword { slave, .. } => slave,
            Self::Omitted => default_unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_slave() {
        let binding = SlaveParam::resolve(&[SlaveParam::Unit, SlaveParam::Slave], 9);
        assert_eq!(
            binding,
            SlaveBinding::Keyword {
                param: SlaveParam::Slave,
                slave: 9
            }
        );
    }

    #[test]
    fn test_resolve_device_id_before_unit() {
        let binding = SlaveParam::resolve(&[SlaveParam::Unit, SlaveParam::DeviceId], 3);
        assert_eq!(
            binding,
            SlaveBinding::Keyword {
                param: SlaveParam::DeviceId,
                slave: 3
            }
        );
    }

    #[test]
    fn test_resolve_unit_only() {
        let binding = SlaveParam::resolve(&[SlaveParam::Unit], 0);
        assert_eq!(binding.unit_id(1), 0);
    }

    #[test]
    fn test_resolve_none_is_omitted() {
        let binding = SlaveParam::resolve(&[], 12);
        assert_eq!(binding, SlaveBinding::Omitted);
        assert_eq!(binding.unit_id(1), 1);
    }
}
