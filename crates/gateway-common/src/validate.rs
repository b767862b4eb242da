//! Range and enum validation for protocol payloads.
//!
//! Every enum type in [`crate::state`] is a plain Rust enum, so membership in
//! its closed set is already enforced by the type system at deserialize
//! time — a value that parsed at all is automatically a valid enum member.
//! What's left for this module is the numeric range checks the type system
//! can't express, rolled up into a single [`Validate`] trait so callers can
//! validate a whole [`crate::state::State`] (or a bare
//! [`crate::state::TurtleState`]) in one call and get back the path of the
//! first offending field.

use std::fmt;

use crate::state::{State, TurtleState};

/// Describes the first field that failed validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{path} out of range: {reason}")]
pub struct ValidationError {
	pub path: String,
	pub reason: String,
}

impl ValidationError {
	fn range(field: &str, value: impl fmt::Display, max: impl fmt::Display) -> Self {
		Self {
			path: field.to_string(),
			reason: format!("{value} exceeds maximum of {max}"),
		}
	}

	/// Prefixes `path` with `prefix.`, used when a nested validation failure
	/// bubbles up through a containing type (e.g. a turtle id).
	fn prefixed(mut self, prefix: &str) -> Self {
		self.path = format!("{prefix}.{}", self.path);
		self
	}
}

pub trait Validate {
	/// Validates `self`, returning the first offending field on failure.
	fn validate(&self) -> Result<(), ValidationError>;
}

macro_rules! check_range {
	($self:ident, $field:ident, $max:expr) => {
		if let Some(v) = $self.$field {
			if v > $max {
				return Err(ValidationError::range(stringify!($field), v, $max));
			}
		}
	};
}

impl Validate for TurtleState {
	fn validate(&self) -> Result<(), ValidationError> {
		check_range!(self, restart_count_motion, 99);
		check_range!(self, restart_count_vision, 99);
		check_range!(self, restart_count_worldmodel, 99);
		check_range!(self, battery_voltage, 99);
		check_range!(self, emergency_status, 100);
		check_range!(self, active_dev_pc, 90);
		check_range!(self, cpu0_load, 99);
		check_range!(self, cpu1_load, 99);
		check_range!(self, temperature_m1, 99);
		check_range!(self, temperature_m2, 99);
		check_range!(self, temperature_m3, 99);
		check_range!(self, cam_status, 10);
		// software_svn_rev / lib_svn_rev are carried verbatim with no
		// documented upper bound in the original, so no range check applies.
		Ok(())
	}
}

impl Validate for State {
	fn validate(&self) -> Result<(), ValidationError> {
		// `command` needs no check beyond "parses as the enum at all": it's
		// a plain Rust enum, so every value that exists is already a member
		// of the closed set.
		for (id, turtle) in &self.turtles {
			turtle.validate().map_err(|e| e.prefixed(&format!("turtles.{id}")))?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::state::State;

	#[test]
	fn in_range_values_are_valid() {
		let mut ts = TurtleState::default();
		ts.battery_voltage = Some(99);
		ts.emergency_status = Some(100);
		ts.active_dev_pc = Some(90);
		assert!(ts.validate().is_ok());
	}

	#[test]
	fn out_of_range_battery_voltage_is_rejected() {
		let mut ts = TurtleState::default();
		ts.battery_voltage = Some(100);
		let err = ts.validate().unwrap_err();
		assert_eq!(err.path, "battery_voltage");
	}

	#[test]
	fn unset_fields_never_fail_validation() {
		assert!(TurtleState::default().validate().is_ok());
	}

	#[test]
	fn state_prefixes_errors_with_turtle_id() {
		let mut st = State::initial();
		st.turtles.get_mut("4").unwrap().emergency_status = Some(101);
		let err = st.validate().unwrap_err();
		assert_eq!(err.path, "turtles.4.emergency_status");
	}
}
