//! Platform identity services.
//!
//! The platform reports which Display Unit this partition runs on; the
//! identity picks one of the five configuration personalities at init. The
//! simulator platform passes the identity as a `DUID=<n>` command-line
//! string instead of a syscall.

use iom_core::DisplayUnit;

/// Source of the local Display Unit identity.
pub trait Platform {
    fn display_unit_id(&self) -> DisplayUnit;
}

/// Fixed identity, for targets where the id is latched at boot and for the
/// simulator.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatform(pub DisplayUnit);

impl Platform for FixedPlatform {
    fn display_unit_id(&self) -> DisplayUnit {
        self.0
    }
}

/// Parse a simulator-style `DUID=<n>` argument. Anything unparseable is the
/// invalid identity, which downstream degrades to the default personality.
pub fn display_unit_from_arg(arg: &str) -> DisplayUnit {
    let digits = arg.strip_prefix("DUID=").unwrap_or(arg);
    match digits.parse::<i32>() {
        Ok(id) => DisplayUnit::from_id(id),
        Err(_) => DisplayUnit::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duid_argument() {
        assert_eq!(display_unit_from_arg("DUID=1"), DisplayUnit::LeftOutboard);
        assert_eq!(display_unit_from_arg("DUID=5"), DisplayUnit::Center);
        assert_eq!(display_unit_from_arg("3"), DisplayUnit::RightInboard);
        assert_eq!(display_unit_from_arg("DUID=9"), DisplayUnit::Invalid);
        assert_eq!(display_unit_from_arg("garbage"), DisplayUnit::Invalid);
    }
}
